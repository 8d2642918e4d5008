//! Deterministic payload bytes used to fill working files
//!
//! A linear congruential generator (multiplier 214013, increment 2531011)
//! mapped onto uppercase ASCII letters. The same seed always yields the same
//! bytes, so a run can be reproduced from its logged seed.

const LCG_MULTIPLIER: u32 = 214_013;
const LCG_INCREMENT: u32 = 2_531_011;

/// Generate `len` payload bytes from `seed`
///
/// # Example
/// ```
/// use syscallmeter::payload::random_payload;
///
/// let a = random_payload(64, 42);
/// let b = random_payload(64, 42);
/// assert_eq!(a, b);
/// assert!(a.iter().all(|b| b.is_ascii_uppercase()));
/// ```
pub fn random_payload(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(LCG_MULTIPLIER)
                .wrapping_add(LCG_INCREMENT);
            b'A' + (((state >> 16) & 0x7FFF) % 26) as u8
        })
        .collect()
}

/// Generate `len` payload bytes from a fresh random seed
pub fn fresh_payload(len: usize) -> (Vec<u8>, u32) {
    let seed = rand::random::<u32>();
    (random_payload(len, seed), seed)
}
