use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt::Write;

use crate::des;
use crate::error::{Error, Result};
use crate::leakage::{hamming_weight, Calibration};
use crate::ta::ROUNDS;
use crate::tools::{Experiment, OUTLIER_THRESHOLD};

/// Timing law of the simulated DES: every round costs `round_cost`, and in
/// the last `leaky_rounds` rounds every set bit at the output of the SBoxes
/// adds `per_bit`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SimulatorConfig {
    pub round_cost: f64,
    pub per_bit: f64,
    pub leaky_rounds: usize,
    /// Amplitude of the uniform noise added to every measurement.
    pub jitter: f64,
    /// Probability that a measurement fails and reports an outlier.
    pub failure_rate: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            round_cost: 150.0,
            per_bit: 30.0,
            leaky_rounds: ROUNDS,
            jitter: 20.0,
            failure_rate: 0.0,
        }
    }
}

/// A DES implementation whose computation time depends on its data, standing
/// in for cycle accurate measurements of a real one.
pub struct Simulator {
    key: u64,
    ks: [u64; 16],
    config: SimulatorConfig,
    rng: StdRng,
}

impl Simulator {
    pub fn new(key: u64, seed: u64, config: SimulatorConfig) -> Result<Self> {
        if config.leaky_rounds > ROUNDS {
            return Err(Error::InvalidArgument(format!(
                "invalid number of leaky rounds: {} (max {ROUNDS})",
                config.leaky_rounds
            )));
        }
        if !(0.0..=1.0).contains(&config.failure_rate) {
            return Err(Error::InvalidArgument(format!(
                "invalid failure rate: {}",
                config.failure_rate
            )));
        }
        if !(config.jitter.is_finite() && config.jitter >= 0.0)
            || !config.round_cost.is_finite()
            || !config.per_bit.is_finite()
        {
            return Err(Error::InvalidArgument("invalid timing parameters".to_string()));
        }
        Ok(Self {
            key,
            ks: des::ks(key),
            config,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Same as [`Simulator::new`] with a key drawn from `seed`.
    pub fn with_random_key(seed: u64, config: SimulatorConfig) -> Result<Self> {
        let key = StdRng::seed_from_u64(seed ^ 0x5eed_4b3e).gen();
        Self::new(key, seed, config)
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn round_keys(&self) -> &[u64; 16] {
        &self.ks
    }

    pub fn last_round_key(&self) -> u64 {
        self.ks[ROUNDS - 1]
    }

    /// Calibration table matching the timing law of one SBox.
    pub fn calibration(&self) -> Calibration {
        Calibration::linear(self.config.per_bit)
    }

    /// Enciphers `pt` and reports how long it took.
    pub fn measure(&mut self, pt: u64) -> Experiment {
        let SimulatorConfig {
            round_cost,
            per_bit,
            leaky_rounds,
            jitter,
            failure_rate,
        } = self.config;
        let mut round = 0;
        let mut time = round_cost * ROUNDS as f64;
        let ct = des::enc_with(&self.ks, pt, |rk, r| {
            round += 1;
            let sbo = des::sboxes(des::e(r) ^ rk);
            if round > ROUNDS - leaky_rounds {
                time += per_bit * hamming_weight(sbo) as f64;
            }
            des::p(sbo)
        });
        if jitter > 0.0 {
            time += self.rng.gen_range(-jitter..=jitter);
        }
        if failure_rate > 0.0 && self.rng.gen_bool(failure_rate) {
            time = OUTLIER_THRESHOLD + self.rng.gen_range(0.0..OUTLIER_THRESHOLD);
        }
        Experiment { ct, time }
    }

    /// One measurement on a random plaintext.
    pub fn sample(&mut self) -> Experiment {
        let pt = self.rng.gen();
        self.measure(pt)
    }

    pub fn acquire(&mut self, n: usize) -> Vec<Experiment> {
        (0..n).map(|_| self.sample()).collect()
    }

    /// Human readable description of the secret key and its schedule.
    pub fn describe_key(&self) -> String {
        let mut txt = String::new();
        let _ = writeln!(txt, "# 64-bits key (with parity bits):    0x{:016x}", self.key);
        let _ = writeln!(txt, "# 56-bits key (without parity bits):   0x{:014x}", des::pc1(self.key));
        for (i, rk) in self.ks.iter().enumerate() {
            let _ = write!(txt, "# 48-bits round key {:2} - 6-bits subkeys: 0x{rk:012x} -", i + 1);
            for j in (0..8).rev() {
                let _ = write!(txt, " 0x{:02x}", (rk >> (j * 6)) & 0x3f);
            }
            txt.push('\n');
        }
        let _ = writeln!(txt, "k16=0x{:012x}", self.last_round_key());
        txt
    }
}
