//! Keyed hashing of 32- and 64-bit integer keys.
//!
//! Two backends provide the same four operations: an AES-NI backend used
//! when the target enables the `aes` feature at compile time, and a
//! portable multiply-mix backend in the style of wyhash used everywhere
//! else. The `portable-hash` cargo feature forces the portable backend so
//! hash distributions can be reproduced on machines without AES-NI.
//!
//! Both backends are keyed by a 64-bit seed. Tables rely on the low bits
//! of the result for slot selection after masking, so every backend must
//! avalanche: flipping any input bit must flip roughly half of the output
//! bits. The seed must decorrelate the mapping, otherwise a crafted key
//! set could keep colliding after a table grows and reseeds.
//!
//! The `multi_*` variants hash a batch of keys into a caller-provided
//! array and are required to produce bit-identical results to the scalar
//! variants for every element. They are written as plain loops over the
//! scalar kernels; the kernels are branch-free and `inline(always)`, which
//! lets the compiler unroll and vectorize the batch.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(all(target_arch = "x86_64", target_feature = "aes", not(feature = "portable-hash")))] {
        use self::aesni as backend;
    } else {
        use self::portable as backend;
    }
}

/// Hashes a 32-bit key with the given seed.
#[inline(always)]
pub(crate) fn hash32(value: u32, seed: u64) -> u64 {
    backend::hash32(value, seed)
}

/// Hashes a batch of 32-bit keys, one output per input.
#[inline(always)]
pub(crate) fn multi_hash32(hashes: &mut [u64], values: &[u32], seed: u64) {
    backend::multi_hash32(hashes, values, seed);
}

/// Hashes a 64-bit key with the given seed.
#[inline(always)]
pub(crate) fn hash64(value: u64, seed: u64) -> u64 {
    backend::hash64(value, seed)
}

/// Hashes a batch of 64-bit keys, one output per input.
#[inline(always)]
pub(crate) fn multi_hash64(hashes: &mut [u64], values: &[u64], seed: u64) {
    backend::multi_hash64(hashes, values, seed);
}

/// Portable multiply-mix backend.
///
/// The kernel folds the key and seed through two 64x64 -> 128 bit
/// multiplications, xoring the high and low halves of each product. The
/// multiplier constants are the usual wyhash secret words.
#[cfg_attr(
    all(target_arch = "x86_64", target_feature = "aes", not(feature = "portable-hash")),
    allow(dead_code)
)]
mod portable {
    const M1: u64 = 0xa076_1d64_78bd_642f;
    const M2: u64 = 0xe703_7ed1_a0b4_28db;
    const M5: u64 = 0x1d8e_4e27_c47d_124f;

    #[inline(always)]
    fn mix(a: u64, b: u64) -> u64 {
        let wide = u128::from(a) * u128::from(b);
        (wide as u64) ^ ((wide >> 64) as u64)
    }

    #[inline(always)]
    pub(super) fn hash64(value: u64, seed: u64) -> u64 {
        mix(M5 ^ 8, mix(value ^ M2, value ^ seed ^ M1))
    }

    #[inline(always)]
    pub(super) fn hash32(value: u32, seed: u64) -> u64 {
        hash64(u64::from(value), seed)
    }

    #[inline(always)]
    pub(super) fn multi_hash32(hashes: &mut [u64], values: &[u32], seed: u64) {
        for (hash, value) in hashes.iter_mut().zip(values) {
            *hash = hash32(*value, seed);
        }
    }

    #[inline(always)]
    pub(super) fn multi_hash64(hashes: &mut [u64], values: &[u64], seed: u64) {
        for (hash, value) in hashes.iter_mut().zip(values) {
            *hash = hash64(*value, seed);
        }
    }
}

/// AES-NI backend.
///
/// One `aesenc` round gives full byte diffusion across a 128-bit lane; two
/// rounds plus a self-keyed finisher are enough for the table's masked
/// slot selection. The round keys are fixed nothing-up-my-sleeve words,
/// with the seed mixed into the initial state so distinct seeds produce
/// uncorrelated mappings.
#[cfg(all(target_arch = "x86_64", target_feature = "aes", not(feature = "portable-hash")))]
mod aesni {
    use core::arch::x86_64::*;

    const K0_LO: u64 = 0x243f_6a88_85a3_08d3;
    const K0_HI: u64 = 0x1319_8a2e_0370_7344;
    const K1_LO: u64 = 0xa409_3822_299f_31d0;
    const K1_HI: u64 = 0x082e_fa98_ec4e_6c89;

    #[inline(always)]
    fn hash_lane(value: u64, seed: u64) -> u64 {
        // SAFETY: This module is only compiled when the target enables the
        // `aes` feature (which implies sse2 on x86_64), so every intrinsic
        // used here is available.
        unsafe {
            let state = _mm_set_epi64x(seed as i64, value as i64);
            let k0 = _mm_set_epi64x(K0_HI as i64, K0_LO as i64);
            let k1 = _mm_set_epi64x(K1_HI as i64, K1_LO as i64);

            let mut h = _mm_xor_si128(state, k0);
            h = _mm_aesenc_si128(h, k1);
            h = _mm_aesenc_si128(h, k0);
            h = _mm_aesenc_si128(h, h);

            _mm_cvtsi128_si64(h) as u64
        }
    }

    #[inline(always)]
    pub(super) fn hash64(value: u64, seed: u64) -> u64 {
        hash_lane(value, seed)
    }

    #[inline(always)]
    pub(super) fn hash32(value: u32, seed: u64) -> u64 {
        hash_lane(u64::from(value), seed)
    }

    #[inline(always)]
    pub(super) fn multi_hash32(hashes: &mut [u64], values: &[u32], seed: u64) {
        for (hash, value) in hashes.iter_mut().zip(values) {
            *hash = hash32(*value, seed);
        }
    }

    #[inline(always)]
    pub(super) fn multi_hash64(hashes: &mut [u64], values: &[u64], seed: u64) {
        for (hash, value) in hashes.iter_mut().zip(values) {
            *hash = hash64(*value, seed);
        }
    }
}
