use serde::Serialize;

use crate::des;

/// Number of 6 bits subkeys (one per SBox) in a round key.
pub const FRAGMENTS: usize = 8;
/// Width of a subkey.
pub const FRAGMENT_BITS: u32 = 6;
/// 2**(subkey length)
pub const GUESS_RANGE: usize = 1 << FRAGMENT_BITS;

/// Hamming weight of a word. The width can be anything up to 64 as long as
/// the unused bits are zeroes.
pub fn hamming_weight(val: u64) -> u32 {
    val.count_ones()
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    hamming_weight(a ^ b)
}

/// Average timing contribution of an SBox output, indexed by its Hamming
/// weight (0 to 4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration(pub [f64; 5]);

impl Default for Calibration {
    fn default() -> Self {
        Calibration([3021.43, 3307.98, 3565.92, 3847.0, 4220.51])
    }
}

impl Calibration {
    /// Constant cost per set bit.
    pub fn linear(per_bit: f64) -> Self {
        Calibration([0.0, per_bit, 2.0 * per_bit, 3.0 * per_bit, 4.0 * per_bit])
    }

    pub fn time(&self, hw: u32) -> f64 {
        self.0[hw as usize]
    }
}

/// Output of SBox `part` (1 for the leftmost) during the last round, assuming
/// its 6 bits subkey is `guess`. `expanded` is E(R15); only the SBox under
/// attack is kept in the returned 32 bits word.
pub fn last_round_sbox(expanded: u64, part: usize, guess: usize) -> u64 {
    let step = 48 - FRAGMENT_BITS as usize * part;
    let sbo = des::sboxes((((expanded >> step) ^ guess as u64) << step) & 0xffff_ffff_ffff);
    sbo & (0xf << (4 * (FRAGMENTS - part)))
}

// leakage model
pub fn leakage_model(calibration: &Calibration, expanded: u64, part: usize, guess: usize) -> f64 {
    calibration.time(hamming_weight(last_round_sbox(expanded, part, guess)))
}
