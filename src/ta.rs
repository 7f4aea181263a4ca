use indicatif::ProgressIterator;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::{IntoParallelIterator, ParallelIterator};
use serde::Serialize;
use tracing::{debug, info};

use crate::des;
use crate::error::{Error, Result};
use crate::leakage::{leakage_model, Calibration, FRAGMENTS, FRAGMENT_BITS, GUESS_RANGE};
use crate::pcc::Pcc;
use crate::tools::{progress_bar, Experiment};

/// Number of DES rounds.
pub const ROUNDS: usize = 16;

/// How the realizations of a fragment are fed to the PCC contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    /// One context, X then Y0..Y63 for every experiment in file order.
    Sequential,
    /// One context per chunk of experiments, merged afterwards.
    Parallel { chunk: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub calibration: Calibration,
    pub strategy: Strategy,
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            strategy: Strategy::Parallel { chunk: 512 },
            progress: false,
        }
    }
}

/// Outcome of the attack on one 6 bits subkey.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// 1 for the leftmost SBox.
    pub part: usize,
    pub guess: usize,
    pub pcc: Array1<f64>,
}

impl Fragment {
    /// PCC of the winning hypothesis.
    pub fn best_pcc(&self) -> f64 {
        self.pcc[self.guess]
    }

    /// Largest absolute PCC among the losing hypotheses.
    pub fn runner_up(&self) -> f64 {
        self.pcc
            .iter()
            .enumerate()
            .filter(|&(k, p)| k != self.guess && p.is_finite())
            .map(|(_, p)| p.abs())
            .fold(0.0, f64::max)
    }
}

/* Divide and conquer recovery of the last round key: the subkeys are
attacked one after the other, leftmost first, and the timing contribution
predicted for every resolved subkey is added to the model used for the
following ones. */
pub struct KeyRecovery {
    config: Config,
    times: Array1<f64>,
    /// E(R15) for every experiment
    expanded: Vec<u64>,
    t_round: f64,
    t_sbox: f64,
    old_ham: Array1<f64>,
    fragments: Vec<Fragment>,
}

impl KeyRecovery {
    pub fn new(experiments: &[Experiment], config: Config) -> Result<Self> {
        if !des::check() {
            return Err(Error::SelfTest);
        }
        if let Strategy::Parallel { chunk: 0 } = config.strategy {
            return Err(Error::InvalidArgument("chunk size shall be positive".to_string()));
        }
        if experiments.len() < 2 {
            return Err(Error::InsufficientData(format!(
                "{} usable experiments, min 2",
                experiments.len()
            )));
        }
        let times: Array1<f64> = experiments.iter().map(|x| x.time).collect();
        // Undo the final permutation, R16L16 -> L16 = R15, then expand.
        let expanded = experiments
            .iter()
            .map(|x| des::e(des::right_half(des::ip(x.ct))))
            .collect();
        let mean = times.mean().unwrap_or_default();
        let t_round = mean / ROUNDS as f64;
        let t_sbox = t_round / FRAGMENTS as f64;
        let nb = experiments.len();
        Ok(Self {
            config,
            times,
            expanded,
            t_round,
            t_sbox,
            old_ham: Array1::zeros(nb),
            fragments: Vec::with_capacity(FRAGMENTS),
        })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Fragments resolved so far.
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn is_done(&self) -> bool {
        self.fragments.len() == FRAGMENTS
    }

    /// Attacks the next subkey and folds its predicted leakage into the
    /// timing model.
    pub fn next_fragment(&mut self) -> Result<&Fragment> {
        let part = self.fragments.len() + 1;
        if part > FRAGMENTS {
            return Err(Error::InvalidArgument("all subkeys already recovered".to_string()));
        }

        // Timing model of each experiment
        let baseline: Array1<f64> = self.old_ham.mapv(|h| {
            self.t_round * (ROUNDS - 1) as f64 + (FRAGMENTS - part) as f64 * self.t_sbox + h
        });
        let hams = self.hypotheses(part)?;
        debug!(part, experiments = self.len(), "hypothesis models built");

        let mut ctx = match self.config.strategy {
            Strategy::Sequential => {
                accumulate(self.times.view(), baseline.view(), &hams, 0..self.len())?
            }
            Strategy::Parallel { chunk } => {
                let nb = self.len();
                let starts: Vec<usize> = (0..nb).step_by(chunk).collect();
                starts
                    .into_par_iter()
                    .map(|start| {
                        accumulate(
                            self.times.view(),
                            baseline.view(),
                            &hams,
                            start..usize::min(start + chunk, nb),
                        )
                    })
                    .reduce_with(|a, b| a?.merge(b?))
                    .unwrap_or_else(|| {
                        Err(Error::InsufficientData("no experiments".to_string()))
                    })?
            }
        };
        ctx.consolidate()?;

        let pcc = ctx.pass_pcc_array().to_owned();
        let guess = best_guess(pcc.view()).ok_or_else(|| {
            Error::InsufficientData(format!(
                "no finite PCC for subkey {part}, timings or models have no variance"
            ))
        })?;
        self.old_ham += &hams.row(guess);

        let fragment = Fragment { part, guess, pcc };
        info!(
            part,
            subkey = %format!("0x{guess:02x}"),
            pcc = fragment.best_pcc(),
            runner_up = fragment.runner_up(),
            "subkey recovered"
        );
        self.fragments.push(fragment);
        Ok(&self.fragments[part - 1])
    }

    /// Attacks every remaining subkey.
    pub fn run(mut self) -> Result<Recovery> {
        let remaining = FRAGMENTS - self.fragments.len();
        if self.config.progress {
            for _ in (0..remaining).progress_with(progress_bar(remaining)) {
                self.next_fragment()?;
            }
        } else {
            for _ in 0..remaining {
                self.next_fragment()?;
            }
        }
        Ok(Recovery {
            experiments: self.len(),
            fragments: self.fragments,
        })
    }

    /// Predicted timing contribution of SBox `part` for each of the 64
    /// subkey hypotheses (rows) and each experiment (columns).
    fn hypotheses(&self, part: usize) -> Result<Array2<f64>> {
        let calibration = self.config.calibration;
        let rows: Vec<Vec<f64>> = (0..GUESS_RANGE)
            .into_par_iter()
            .map(|guess| {
                self.expanded
                    .iter()
                    .map(|&e| leakage_model(&calibration, e, part, guess))
                    .collect()
            })
            .collect();
        Array2::from_shape_vec((GUESS_RANGE, self.len()), rows.concat())
            .map_err(|e| Error::InvalidArgument(e.to_string()))
    }
}

/// Streams experiments `range` into a fresh context: the measured time as X,
/// then the model of every hypothesis as Y0..Y63.
fn accumulate(
    times: ArrayView1<f64>,
    baseline: ArrayView1<f64>,
    hams: &Array2<f64>,
    range: std::ops::Range<usize>,
) -> Result<Pcc> {
    let mut ctx = Pcc::new(hams.len_of(Axis(0)))?;
    for i in range {
        ctx.insert_x(times[i])?;
        for (guess, ham) in hams.column(i).iter().enumerate() {
            ctx.insert_y(guess, baseline[i] + ham)?;
        }
    }
    Ok(ctx)
}

/// Index of the largest absolute PCC. Non finite values never win and ties
/// go to the lowest index.
pub fn best_guess(pcc: ArrayView1<f64>) -> Option<usize> {
    let mut guess = None;
    let mut init_value = f64::NEG_INFINITY;
    for (k, p) in pcc.iter().enumerate() {
        if p.is_finite() && p.abs() > init_value {
            init_value = p.abs();
            guess = Some(k);
        }
    }
    guess
}

/// The recovered last round key and the PCCs it was chosen from.
#[derive(Debug, Clone)]
pub struct Recovery {
    experiments: usize,
    fragments: Vec<Fragment>,
}

impl Recovery {
    /// The 48 bits round key, first subkey in the most significant bits.
    pub fn key(&self) -> u64 {
        self.fragments
            .iter()
            .fold(0, |key, f| (key << FRAGMENT_BITS) | f.guess as u64)
    }

    pub fn key_hex(&self) -> String {
        format!("0x{:012x}", self.key())
    }

    pub fn experiments(&self) -> usize {
        self.experiments
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// PCCs of all hypotheses, one row per subkey.
    pub fn corr(&self) -> Array2<f64> {
        let mut corr = Array2::zeros((self.fragments.len(), GUESS_RANGE));
        for (mut row, f) in corr.rows_mut().into_iter().zip(&self.fragments) {
            row.assign(&f.pcc);
        }
        corr
    }
}

/// Runs the whole attack on already filtered experiments.
pub fn recover(experiments: &[Experiment], config: Config) -> Result<Recovery> {
    KeyRecovery::new(experiments, config)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn best_guess_uses_absolute_value() {
        assert_eq!(best_guess(array![0.1, -0.9, 0.5].view()), Some(1));
    }

    #[test]
    fn best_guess_skips_non_finite_and_keeps_lowest_tie() {
        assert_eq!(best_guess(array![f64::NAN, 0.3, -0.3, f64::INFINITY].view()), Some(1));
        assert_eq!(best_guess(array![f64::NAN, f64::NAN].view()), None);
    }

    #[test]
    fn too_few_experiments() {
        let xs = [Experiment { ct: 0, time: 1.0 }];
        assert!(matches!(
            KeyRecovery::new(&xs, Config::default()),
            Err(Error::InsufficientData(_))
        ));
    }

    #[test]
    fn empty_chunks_rejected() {
        let xs = [Experiment { ct: 0, time: 1.0 }, Experiment { ct: 1, time: 2.0 }];
        let config = Config {
            strategy: Strategy::Parallel { chunk: 0 },
            ..Default::default()
        };
        assert!(matches!(
            KeyRecovery::new(&xs, config),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn constant_timings_have_no_winner() {
        let xs: Vec<Experiment> = (0..50)
            .map(|i| Experiment { ct: i * 0x0123_4567_89ab_cdef, time: 3000.0 })
            .collect();
        let mut ta = KeyRecovery::new(&xs, Config::default()).unwrap();
        assert!(matches!(ta.next_fragment(), Err(Error::InsufficientData(_))));
    }

    #[test]
    fn key_concatenates_subkeys() {
        let fragments = (1..=FRAGMENTS)
            .map(|part| Fragment {
                part,
                guess: [0x3f, 0x00, 0x15, 0x2a, 0x01, 0x20, 0x0f, 0x30][part - 1],
                pcc: Array1::zeros(GUESS_RANGE),
            })
            .collect();
        let r = Recovery { experiments: 0, fragments };
        assert_eq!(r.key(), 0xfc056a0603f0);
        assert_eq!(r.key_hex(), "0xfc056a0603f0");
        assert_eq!(r.corr().shape(), &[FRAGMENTS, GUESS_RANGE]);
    }
}
