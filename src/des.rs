/* Data Encryption Standard. All values are right aligned in a u64 and bit
positions follow the standard: 1 is the leftmost bit of the word. */

const IP: [u8; 64] = [
    58, 50, 42, 34, 26, 18, 10, 2,
    60, 52, 44, 36, 28, 20, 12, 4,
    62, 54, 46, 38, 30, 22, 14, 6,
    64, 56, 48, 40, 32, 24, 16, 8,
    57, 49, 41, 33, 25, 17, 9, 1,
    59, 51, 43, 35, 27, 19, 11, 3,
    61, 53, 45, 37, 29, 21, 13, 5,
    63, 55, 47, 39, 31, 23, 15, 7,
];

const FP: [u8; 64] = [
    40, 8, 48, 16, 56, 24, 64, 32,
    39, 7, 47, 15, 55, 23, 63, 31,
    38, 6, 46, 14, 54, 22, 62, 30,
    37, 5, 45, 13, 53, 21, 61, 29,
    36, 4, 44, 12, 52, 20, 60, 28,
    35, 3, 43, 11, 51, 19, 59, 27,
    34, 2, 42, 10, 50, 18, 58, 26,
    33, 1, 41, 9, 49, 17, 57, 25,
];

const EXPANSION: [u8; 48] = [
    32, 1, 2, 3, 4, 5,
    4, 5, 6, 7, 8, 9,
    8, 9, 10, 11, 12, 13,
    12, 13, 14, 15, 16, 17,
    16, 17, 18, 19, 20, 21,
    20, 21, 22, 23, 24, 25,
    24, 25, 26, 27, 28, 29,
    28, 29, 30, 31, 32, 1,
];

const PERMUTATION: [u8; 32] = [
    16, 7, 20, 21,
    29, 12, 28, 17,
    1, 15, 23, 26,
    5, 18, 31, 10,
    2, 8, 24, 14,
    32, 27, 3, 9,
    19, 13, 30, 6,
    22, 11, 4, 25,
];

const PC1: [u8; 56] = [
    57, 49, 41, 33, 25, 17, 9,
    1, 58, 50, 42, 34, 26, 18,
    10, 2, 59, 51, 43, 35, 27,
    19, 11, 3, 60, 52, 44, 36,
    63, 55, 47, 39, 31, 23, 15,
    7, 62, 54, 46, 38, 30, 22,
    14, 6, 61, 53, 45, 37, 29,
    21, 13, 5, 28, 20, 12, 4,
];

const PC2: [u8; 48] = [
    14, 17, 11, 24, 1, 5,
    3, 28, 15, 6, 21, 10,
    23, 19, 12, 4, 26, 8,
    16, 7, 27, 20, 13, 2,
    41, 52, 31, 37, 47, 55,
    30, 40, 51, 45, 33, 48,
    44, 49, 39, 56, 34, 53,
    46, 42, 50, 36, 29, 32,
];

/// Number of left shifts of C and D before each round.
pub const LEFT_SHIFTS: [u32; 16] = [1, 1, 2, 2, 2, 2, 2, 2, 1, 2, 2, 2, 2, 2, 2, 1];

// 8 boxes of 4 rows x 16 columns
const SBOXES: [u8; 512] = [
    14, 4, 13, 1, 2, 15, 11, 8, 3, 10, 6, 12, 5, 9, 0, 7,
    0, 15, 7, 4, 14, 2, 13, 1, 10, 6, 12, 11, 9, 5, 3, 8,
    4, 1, 14, 8, 13, 6, 2, 11, 15, 12, 9, 7, 3, 10, 5, 0,
    15, 12, 8, 2, 4, 9, 1, 7, 5, 11, 3, 14, 10, 0, 6, 13,

    15, 1, 8, 14, 6, 11, 3, 4, 9, 7, 2, 13, 12, 0, 5, 10,
    3, 13, 4, 7, 15, 2, 8, 14, 12, 0, 1, 10, 6, 9, 11, 5,
    0, 14, 7, 11, 10, 4, 13, 1, 5, 8, 12, 6, 9, 3, 2, 15,
    13, 8, 10, 1, 3, 15, 4, 2, 11, 6, 7, 12, 0, 5, 14, 9,

    10, 0, 9, 14, 6, 3, 15, 5, 1, 13, 12, 7, 11, 4, 2, 8,
    13, 7, 0, 9, 3, 4, 6, 10, 2, 8, 5, 14, 12, 11, 15, 1,
    13, 6, 4, 9, 8, 15, 3, 0, 11, 1, 2, 12, 5, 10, 14, 7,
    1, 10, 13, 0, 6, 9, 8, 7, 4, 15, 14, 3, 11, 5, 2, 12,

    7, 13, 14, 3, 0, 6, 9, 10, 1, 2, 8, 5, 11, 12, 4, 15,
    13, 8, 11, 5, 6, 15, 0, 3, 4, 7, 2, 12, 1, 10, 14, 9,
    10, 6, 9, 0, 12, 11, 7, 13, 15, 1, 3, 14, 5, 2, 8, 4,
    3, 15, 0, 6, 10, 1, 13, 8, 9, 4, 5, 11, 12, 7, 2, 14,

    2, 12, 4, 1, 7, 10, 11, 6, 8, 5, 3, 15, 13, 0, 14, 9,
    14, 11, 2, 12, 4, 7, 13, 1, 5, 0, 15, 10, 3, 9, 8, 6,
    4, 2, 1, 11, 10, 13, 7, 8, 15, 9, 12, 5, 6, 3, 0, 14,
    11, 8, 12, 7, 1, 14, 2, 13, 6, 15, 0, 9, 10, 4, 5, 3,

    12, 1, 10, 15, 9, 2, 6, 8, 0, 13, 3, 4, 14, 7, 5, 11,
    10, 15, 4, 2, 7, 12, 9, 5, 6, 1, 13, 14, 0, 11, 3, 8,
    9, 14, 15, 5, 2, 8, 12, 3, 7, 0, 4, 10, 1, 13, 11, 6,
    4, 3, 2, 12, 9, 5, 15, 10, 11, 14, 1, 7, 6, 0, 8, 13,

    4, 11, 2, 14, 15, 0, 8, 13, 3, 12, 9, 7, 5, 10, 6, 1,
    13, 0, 11, 7, 4, 9, 1, 10, 14, 3, 5, 12, 2, 15, 8, 6,
    1, 4, 11, 13, 12, 3, 7, 14, 10, 15, 6, 8, 0, 5, 9, 2,
    6, 11, 13, 8, 1, 4, 10, 7, 9, 5, 0, 15, 14, 2, 3, 12,

    13, 2, 8, 4, 6, 15, 11, 1, 10, 9, 3, 14, 5, 0, 12, 7,
    1, 15, 13, 8, 10, 3, 7, 4, 12, 5, 6, 11, 0, 14, 9, 2,
    7, 11, 4, 1, 9, 12, 14, 2, 0, 6, 10, 13, 15, 3, 5, 8,
    2, 1, 14, 7, 4, 10, 8, 13, 15, 12, 9, 0, 3, 5, 6, 11,
];

/// Generic permutation - selection: bit #i of the result (from the left) is
/// bit #table[i] of the `width` bits input.
fn permute(val: u64, width: u32, table: &[u8]) -> u64 {
    table
        .iter()
        .fold(0, |res, &pos| (res << 1) | ((val >> (width - pos as u32)) & 1))
}

/// Initial permutation (64 to 64 bits). Same as inverse of final permutation.
pub fn ip(val: u64) -> u64 {
    permute(val, 64, &IP)
}

/// Final permutation (64 to 64 bits).
pub fn fp(val: u64) -> u64 {
    permute(val, 64, &FP)
}

/// Inverse of initial permutation.
pub fn n_ip(val: u64) -> u64 {
    fp(val)
}

/// E expansion - permutation (32 to 48 bits).
pub fn e(val: u64) -> u64 {
    permute(val & 0xffff_ffff, 32, &EXPANSION)
}

/// P permutation (32 to 32 bits).
pub fn p(val: u64) -> u64 {
    permute(val & 0xffff_ffff, 32, &PERMUTATION)
}

/// PC1 permutation - selection (64 to 56 bits). Parity bits are dropped.
pub fn pc1(val: u64) -> u64 {
    permute(val, 64, &PC1)
}

/// PC2 permutation - selection (56 to 48 bits).
pub fn pc2(val: u64) -> u64 {
    permute(val & 0x00ff_ffff_ffff_ffff, 56, &PC2)
}

/// Single SBox computation (6 to 4 bits). `sbox` ranges from 1 (leftmost)
/// to 8 (rightmost).
pub fn sbox(sbox: usize, val: u64) -> u64 {
    let row = ((val >> 4) & 0b10) | (val & 1);
    let col = (val >> 1) & 0xf;
    SBOXES[64 * (sbox - 1) + (16 * row + col) as usize] as u64
}

/// All SBoxes computation (48 to 32 bits).
pub fn sboxes(val: u64) -> u64 {
    (1..=8).fold(0, |res, n| {
        (res << 4) | sbox(n, (val >> (48 - 6 * n)) & 0x3f)
    })
}

pub fn right_half(val: u64) -> u64 {
    val & 0xffff_ffff
}

pub fn left_half(val: u64) -> u64 {
    val >> 32
}

/// The F function: 48 bits round key and 32 bits data to 32 bits.
pub fn f(rk: u64, val: u64) -> u64 {
    p(sboxes(e(val) ^ rk))
}

fn rotate_28(val: u64, n: u32) -> u64 {
    ((val << n) | (val >> (28 - n))) & 0x0fff_ffff
}

/// Key schedule: the sixteen 48 bits round keys of a 64 bits key,
/// first round first.
pub fn ks(key: u64) -> [u64; 16] {
    let cd = pc1(key);
    let mut c = cd >> 28;
    let mut d = cd & 0x0fff_ffff;
    let mut ks = [0_u64; 16];
    for (rk, &shift) in ks.iter_mut().zip(LEFT_SHIFTS.iter()) {
        c = rotate_28(c, shift);
        d = rotate_28(d, shift);
        *rk = pc2((c << 28) | d);
    }
    ks
}

/// Enciphers with a custom F function, as used by the timing simulator.
pub fn enc_with<F>(ks: &[u64; 16], val: u64, mut f: F) -> u64
where
    F: FnMut(u64, u64) -> u64,
{
    let lr = ip(val);
    let mut l = left_half(lr);
    let mut r = right_half(lr);
    for rk in ks.iter() {
        let tmp = r;
        r = l ^ f(*rk, r);
        l = tmp;
    }
    fp((r << 32) | l)
}

pub fn enc(ks: &[u64; 16], val: u64) -> u64 {
    enc_with(ks, val, f)
}

pub fn dec(ks: &[u64; 16], val: u64) -> u64 {
    let mut rev = *ks;
    rev.reverse();
    enc_with(&rev, val, f)
}

// (key, plaintext, ciphertext)
const KNOWN_ANSWERS: [(u64, u64, u64); 4] = [
    (0x133457799bbcdff1, 0x0123456789abcdef, 0x85e813540f0ab405),
    (0x0e329232ea6d0d73, 0x8787878787878787, 0x0000000000000000),
    (0x0000000000000000, 0x0000000000000000, 0x8ca64de9c1b123a7),
    (0xffffffffffffffff, 0xffffffffffffffff, 0x7359b2163e4edc58),
];

/// Functional verification of the implementation against pre-computed
/// encipherments and the corresponding decipherments.
pub fn check() -> bool {
    KNOWN_ANSWERS.iter().all(|&(key, pt, ct)| {
        let ks = ks(key);
        enc(&ks, pt) == ct && dec(&ks, ct) == pt
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_check() {
        assert!(check());
    }

    #[test]
    fn permutations_invert() {
        let v = 0x0123456789abcdef;
        assert_eq!(ip(v), 0xcc00ccfff0aaf0aa);
        assert_eq!(fp(ip(v)), v);
        assert_eq!(n_ip(ip(v)), v);
    }

    #[test]
    fn expansion_and_halves() {
        let lr = ip(0x0123456789abcdef);
        assert_eq!(left_half(lr), 0xcc00ccff);
        assert_eq!(right_half(lr), 0xf0aaf0aa);
        assert_eq!(e(0xf0aaf0aa), 0x7a15557a1555);
    }

    #[test]
    fn round_keys() {
        let ks = ks(0x133457799bbcdff1);
        assert_eq!(ks[0], 0x1b02effc7072);
        assert_eq!(ks[15], 0xcb3d8b0e17f5);
    }

    #[test]
    fn single_sbox() {
        // S1, row 0b01, column 0b1101
        assert_eq!(sbox(1, 0b011011), 5);
        assert_eq!(sboxes(0x0000_0000_0000) >> 28, 14);
    }

    #[test]
    fn round_trip() {
        let ks = ks(0x0f1e2d3c4b5a6978);
        for pt in [0u64, 1, 0xdeadbeefcafebabe, u64::MAX] {
            assert_eq!(dec(&ks, enc(&ks, pt)), pt);
        }
    }
}
