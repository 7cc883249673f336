//! Deterministic, non-cryptographic selection of a subset of the shared
//! parameter data vector, digested with SHA-256 into a session key.
//!
//! `process_random_data_set` is *not* a secure RNG on its own — it is a
//! reproducible churn over a seed, used only so that every peer who shares
//! the same `PDV` and the same seed derives the same key. Security rests on
//! the secrecy of the `PDV` and on SHA-256 compressing the selected subset,
//! not on this selection being unpredictable.
//!
//! The arithmetic here (the primes table, the saturating seed advance, the
//! subset-size churn loop, the digest-byte-to-seed extraction) is preserved
//! bit-for-bit from the original implementation: any deviation breaks
//! cross-node convergence, since every peer must derive the identical key
//! from the identical seed.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Size of the shared parameter data vector, in bytes.
pub const PDV_SIZE: usize = 128;

const MIN_SUBSET: u32 = 32;

const FIRST_32_PRIMES: [u32; 32] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131,
];

/// A deterministic churn over `seed`, returning a value strictly less than
/// 2^16.
#[must_use]
pub fn modulo_64k(seed: u32) -> u32 {
    let mut random = seed;
    while random < (1u32 << 31) {
        random <<= 1;
        let prime = FIRST_32_PRIMES[(random % 32) as usize];
        if (u32::MAX - random) > 2 * prime {
            random = random.wrapping_add(prime);
            random = random.wrapping_add(random % prime);
        }
    }
    random % 65536
}

/// Selects a deterministic pseudo-random subset of `pdv` (driven by `seed`)
/// and returns `(SHA256(subset) zero-padded/truncated to out_len, next seed)`.
///
/// The next seed is the little-endian `u32` built from digest bytes at
/// indices 0, 5, 10, and 15. The output key is wrapped in `Zeroizing` since
/// it's a live session/fallback key, not scratch material.
#[must_use]
pub fn process_random_data_set(
    pdv: &[u8; PDV_SIZE],
    seed: u32,
    out_len: usize,
) -> (Zeroizing<Vec<u8>>, u32) {
    let mut subset_size = modulo_64k(seed) % (PDV_SIZE as u32);
    while subset_size < MIN_SUBSET || subset_size as usize == PDV_SIZE {
        let r1 = FIRST_32_PRIMES[(subset_size % 32) as usize];
        let r2 = (subset_size << 1) + r1;
        let r3 = r2 % r1;
        subset_size = if r3 == 0 {
            (r1 + r2) % (PDV_SIZE as u32)
        } else {
            r3 % (PDV_SIZE as u32)
        };
    }

    let mut chosen = [false; PDV_SIZE];
    let mut selected = Zeroizing::new(Vec::<u8>::with_capacity(subset_size as usize));
    let mut selection_seed = seed;
    while (selected.len() as u32) < subset_size {
        let idx = (modulo_64k(selection_seed) % (PDV_SIZE as u32)) as usize;
        if !chosen[idx] {
            selected.push(pdv[idx]);
            chosen[idx] = true;
        }
        let random_index = ((selection_seed % FIRST_32_PRIMES[idx % 32]) % 32) as usize;
        let difference = u32::MAX - selection_seed;
        let step = FIRST_32_PRIMES[random_index];
        if difference > step {
            selection_seed += step;
        } else {
            selection_seed -= difference;
        }
    }

    let digest = Sha256::digest(selected.as_slice());

    let mut out_key = Zeroizing::new(vec![0u8; out_len]);
    let copy_len = out_len.min(32);
    out_key[..copy_len].copy_from_slice(&digest[..copy_len]);

    let new_seed = u32::from_le_bytes([digest[0], digest[5], digest[10], digest[15]]);
    (out_key, new_seed)
}
