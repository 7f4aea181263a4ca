use ndarray::{Array1, ArrayView1};
use tracing::debug;

use crate::error::{Error, Result};

/// Which half of the X, Y0..Yn-1 alternation the context is in. Flipped by
/// every X insertion; a Y variable is up to date when its own parity matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn flip(self) -> Self {
        match self {
            Parity::Even => Parity::Odd,
            Parity::Odd => Parity::Even,
        }
    }
}

/* Pearson correlation coefficients between one X random variable and ny Y
random variables, computed from running sums so that realizations are never
stored:

PCC(X, Yj) = (n.Sxy - Sx.Sy) / sqrt(n.Sx2 - Sx^2) / sqrt(n.Sy2 - Sy^2)

Realizations are inserted as: one X, then exactly one of every Yj (in any
order), then the next X, and so on. */
#[derive(Debug, Clone)]
pub struct Pcc {
    ny: usize,
    nr: usize,
    sum_x: f64,
    sig_x: f64,
    sum_y: Array1<f64>,
    sig_y: Array1<f64>,
    cov: Array1<f64>,
    pcc: Array1<f64>,
    rx: f64,
    state: Parity,
    flags: Vec<Parity>,
}

impl Pcc {
    pub fn new(ny: usize) -> Result<Self> {
        if ny < 1 {
            return Err(Error::InvalidArgument(format!(
                "invalid number of Y random variables: {ny}"
            )));
        }
        Ok(Self {
            ny,
            nr: 0,
            sum_x: 0.0,
            sig_x: 0.0,
            sum_y: Array1::zeros(ny),
            sig_y: Array1::zeros(ny),
            cov: Array1::zeros(ny),
            pcc: Array1::zeros(ny),
            rx: 0.0,
            state: Parity::Even,
            flags: vec![Parity::Even; ny],
        })
    }

    /// Number of Y random variables.
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Number of X realizations inserted so far.
    pub fn nr(&self) -> usize {
        self.nr
    }

    pub fn parity(&self) -> Parity {
        self.state
    }

    /// Starts a new round with a realization of X.
    pub fn insert_x(&mut self, x: f64) -> Result<()> {
        if !x.is_finite() {
            return Err(Error::InvalidArgument(format!("X realization is not a number: {x}")));
        }
        self.check_round("cannot insert X")?;
        self.rx = x;
        self.sum_x += x;
        self.sig_x += x * x;
        self.state = self.state.flip();
        self.nr += 1;
        Ok(())
    }

    /// Adds the realization of Yj for the current round.
    pub fn insert_y(&mut self, j: usize, y: f64) -> Result<()> {
        if j >= self.ny {
            return Err(Error::InvalidArgument(format!(
                "invalid Y index: {j} (ny = {})",
                self.ny
            )));
        }
        if !y.is_finite() {
            return Err(Error::InvalidArgument(format!("Y{j} realization is not a number: {y}")));
        }
        if self.nr == 0 {
            return Err(Error::Sequence(
                "a realization of X should be inserted first".to_string(),
            ));
        }
        if self.flags[j] == self.state {
            if self.flags.iter().all(|&f| f == self.state) {
                return Err(Error::Sequence(format!(
                    "round complete, a realization of X should be inserted before Y{j}"
                )));
            }
            return Err(Error::Sequence(format!("Y realization #{j} inserted twice")));
        }
        self.sum_y[j] += y;
        self.sig_y[j] += y * y;
        self.cov[j] += self.rx * y;
        self.flags[j] = self.state;
        Ok(())
    }

    /// Computes the ny PCCs from everything inserted since creation.
    pub fn consolidate(&mut self) -> Result<()> {
        self.check_round("cannot consolidate")?;
        if self.nr < 2 {
            return Err(Error::InsufficientData(format!(
                "not enough realizations ({}, min 2)",
                self.nr
            )));
        }
        let n = self.nr as f64;
        let lower_x = f64::sqrt(n * self.sig_x - self.sum_x * self.sum_x);
        for j in 0..self.ny {
            let upper = n * self.cov[j] - self.sum_x * self.sum_y[j];
            let lower_y = f64::sqrt(n * self.sig_y[j] - self.sum_y[j] * self.sum_y[j]);
            self.pcc[j] = upper / lower_x / lower_y;
        }
        debug!(ny = self.ny, nr = self.nr, "consolidated PCC context");
        Ok(())
    }

    /// Last consolidated PCC(X, Yj). Zero until the first consolidation.
    pub fn pcc(&self, j: usize) -> Result<f64> {
        self.pcc.get(j).copied().ok_or_else(|| {
            Error::InvalidArgument(format!("invalid Y index: {j} (ny = {})", self.ny))
        })
    }

    pub fn pass_pcc_array(&self) -> ArrayView1<f64> {
        self.pcc.view()
    }

    /// Sums the statistics of two contexts fed with disjoint realizations.
    /// Both must sit between two rounds.
    pub fn merge(self, rhs: Self) -> Result<Self> {
        if self.ny != rhs.ny {
            return Err(Error::InvalidArgument(format!(
                "cannot merge contexts of {} and {} Y random variables",
                self.ny, rhs.ny
            )));
        }
        self.check_round("cannot merge")?;
        rhs.check_round("cannot merge")?;
        let state = self.state;
        Ok(Self {
            ny: self.ny,
            nr: self.nr + rhs.nr,
            sum_x: self.sum_x + rhs.sum_x,
            sig_x: self.sig_x + rhs.sig_x,
            sum_y: self.sum_y + rhs.sum_y,
            sig_y: self.sig_y + rhs.sig_y,
            cov: self.cov + rhs.cov,
            pcc: self.pcc,
            rx: self.rx,
            state,
            flags: vec![state; self.ny],
        })
    }

    fn check_round(&self, what: &str) -> Result<()> {
        let missing: Vec<String> = self
            .flags
            .iter()
            .enumerate()
            .filter(|&(_, &f)| f != self.state)
            .map(|(j, _)| format!("Y{j}"))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Sequence(format!(
                "{what}, missing realizations {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(ctx: &mut Pcc, x: &[f64], ys: &[&[f64]]) {
        for (i, &xi) in x.iter().enumerate() {
            ctx.insert_x(xi).unwrap();
            for (j, y) in ys.iter().enumerate() {
                ctx.insert_y(j, y[i]).unwrap();
            }
        }
    }

    fn direct(x: &[f64], y: &[f64]) -> f64 {
        let n = x.len() as f64;
        let mx = x.iter().sum::<f64>() / n;
        let my = y.iter().sum::<f64>() / n;
        let cov: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
        let vx: f64 = x.iter().map(|a| (a - mx) * (a - mx)).sum();
        let vy: f64 = y.iter().map(|b| (b - my) * (b - my)).sum();
        cov / (vx.sqrt() * vy.sqrt())
    }

    #[test]
    fn perfect_positive_and_negative() {
        let mut ctx = Pcc::new(2).unwrap();
        feed(
            &mut ctx,
            &[1.0, 2.0, 3.0, 4.0],
            &[&[2.0, 4.0, 6.0, 8.0], &[8.0, 6.0, 4.0, 2.0]],
        );
        ctx.consolidate().unwrap();
        assert!((ctx.pcc(0).unwrap() - 1.0).abs() < 1e-9);
        assert!((ctx.pcc(1).unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn affine_candidates() {
        let x = [0.5, -1.25, 3.0, 7.5, 2.0, 2.25];
        let up: Vec<f64> = x.iter().map(|v| 3.5 * v + 10.0).collect();
        let down: Vec<f64> = x.iter().map(|v| -0.25 * v + 1.0).collect();
        let mut ctx = Pcc::new(2).unwrap();
        feed(&mut ctx, &x, &[&up, &down]);
        ctx.consolidate().unwrap();
        assert!((ctx.pcc(0).unwrap() - 1.0).abs() < 1e-9);
        assert!((ctx.pcc(1).unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_candidates_rejected() {
        assert!(matches!(Pcc::new(0), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn y_before_any_x() {
        let mut ctx = Pcc::new(3).unwrap();
        assert!(matches!(ctx.insert_y(0, 1.0), Err(Error::Sequence(_))));
    }

    #[test]
    fn duplicate_y() {
        let mut ctx = Pcc::new(2).unwrap();
        ctx.insert_x(1.0).unwrap();
        ctx.insert_y(1, 1.0).unwrap();
        assert!(matches!(ctx.insert_y(1, 2.0), Err(Error::Sequence(_))));
    }

    #[test]
    fn y_after_complete_round() {
        let mut ctx = Pcc::new(2).unwrap();
        feed(&mut ctx, &[1.0], &[&[1.0], &[2.0]]);
        match ctx.insert_y(0, 3.0) {
            Err(Error::Sequence(msg)) => {
                assert!(msg.contains("realization of X"));
                assert!(!msg.contains("twice"));
            }
            other => panic!("unexpected {other:?}"),
        }
        ctx.insert_x(2.0).unwrap();
        ctx.insert_y(0, 3.0).unwrap();
        match ctx.insert_y(0, 4.0) {
            Err(Error::Sequence(msg)) => assert!(msg.contains("twice")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parity_flips_with_every_x() {
        let mut ctx = Pcc::new(1).unwrap();
        assert_eq!(ctx.parity(), Parity::Even);
        feed(&mut ctx, &[1.0], &[&[1.0]]);
        assert_eq!(ctx.parity(), Parity::Odd);
        feed(&mut ctx, &[2.0], &[&[2.0]]);
        assert_eq!(ctx.parity(), Parity::Even);
        assert_eq!(Parity::Odd.flip(), Parity::Even);
    }

    #[test]
    fn x_before_round_complete() {
        let mut ctx = Pcc::new(2).unwrap();
        ctx.insert_x(1.0).unwrap();
        ctx.insert_y(0, 1.0).unwrap();
        let err = ctx.insert_x(2.0).unwrap_err();
        match err {
            Error::Sequence(msg) => assert!(msg.contains("Y1")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn consolidate_mid_round() {
        let mut ctx = Pcc::new(2).unwrap();
        feed(&mut ctx, &[1.0, 2.0], &[&[1.0, 3.0], &[2.0, 0.0]]);
        ctx.insert_x(3.0).unwrap();
        ctx.insert_y(0, 5.0).unwrap();
        assert!(matches!(ctx.consolidate(), Err(Error::Sequence(_))));
    }

    #[test]
    fn consolidate_needs_two_realizations() {
        let mut ctx = Pcc::new(1).unwrap();
        assert!(matches!(ctx.consolidate(), Err(Error::InsufficientData(_))));
        feed(&mut ctx, &[1.0], &[&[1.0]]);
        assert!(matches!(ctx.consolidate(), Err(Error::InsufficientData(_))));
    }

    #[test]
    fn bad_index_and_non_numbers() {
        let mut ctx = Pcc::new(2).unwrap();
        assert!(matches!(ctx.pcc(2), Err(Error::InvalidArgument(_))));
        assert!(matches!(ctx.insert_x(f64::NAN), Err(Error::InvalidArgument(_))));
        ctx.insert_x(1.0).unwrap();
        assert!(matches!(ctx.insert_y(5, 1.0), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            ctx.insert_y(0, f64::INFINITY),
            Err(Error::InvalidArgument(_))
        ));
        // rejected realizations leave the round open
        ctx.insert_y(0, 1.0).unwrap();
        ctx.insert_y(1, 1.0).unwrap();
        assert_eq!(ctx.nr(), 1);
    }

    #[test]
    fn reconsolidation_is_cumulative() {
        let x = [1.0, 4.0, 2.0, 8.0, 5.0, 7.0, 3.0];
        let y = [2.0, 3.0, 1.0, 9.0, 4.0, 4.0, 6.0];
        let mut ctx = Pcc::new(1).unwrap();
        feed(&mut ctx, &x[..3], &[&y[..3]]);
        ctx.consolidate().unwrap();
        let early = ctx.pcc(0).unwrap();
        assert!((early - direct(&x[..3], &y[..3])).abs() < 1e-9);
        feed(&mut ctx, &x[3..], &[&y[3..]]);
        ctx.consolidate().unwrap();
        assert!((ctx.pcc(0).unwrap() - direct(&x, &y)).abs() < 1e-9);
        assert_eq!(ctx.nr(), x.len());
    }

    #[test]
    fn zero_variance_is_not_finite() {
        let mut ctx = Pcc::new(1).unwrap();
        feed(&mut ctx, &[1.0, 2.0, 3.0], &[&[4.0, 4.0, 4.0]]);
        ctx.consolidate().unwrap();
        assert!(!ctx.pcc(0).unwrap().is_finite());
    }

    #[test]
    fn merge_matches_single_stream() {
        let x = [1.0, 4.0, 2.0, 8.0, 5.0, 7.0];
        let y0 = [2.0, 3.0, 1.0, 9.0, 4.0, 4.0];
        let y1 = [0.0, -3.0, 1.5, -9.0, 2.0, -1.0];
        let mut whole = Pcc::new(2).unwrap();
        feed(&mut whole, &x, &[&y0, &y1]);
        whole.consolidate().unwrap();

        let mut a = Pcc::new(2).unwrap();
        feed(&mut a, &x[..2], &[&y0[..2], &y1[..2]]);
        let mut b = Pcc::new(2).unwrap();
        feed(&mut b, &x[2..], &[&y0[2..], &y1[2..]]);
        let mut merged = a.merge(b).unwrap();
        merged.consolidate().unwrap();

        assert_eq!(merged.nr(), 6);
        for j in 0..2 {
            assert!((merged.pcc(j).unwrap() - whole.pcc(j).unwrap()).abs() < 1e-9);
        }
        // the merged context keeps accepting rounds
        merged.insert_x(1.0).unwrap();
        merged.insert_y(0, 1.0).unwrap();
        merged.insert_y(1, 1.0).unwrap();
    }

    #[test]
    fn merge_rejects_open_round() {
        let mut a = Pcc::new(1).unwrap();
        a.insert_x(1.0).unwrap();
        let b = Pcc::new(1).unwrap();
        assert!(matches!(a.merge(b), Err(Error::Sequence(_))));
    }
}
