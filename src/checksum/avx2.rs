//! AVX2 Adler-32 kernel.
//!
//! Each 32-byte lane contributes `Σ b` to `s1` (via `sad_epu8`) and
//! `Σ (32 - i) · b[i]` to `s2` (via `maddubs_epi16` against descending
//! weights, widened by `madd_epi16`).  Every lane also adds `32 · s1` as it
//! stood before the lane, which is carried in `sum_v << 5`.  Chunks are
//! capped at the largest multiple of 32 below `ADLER_NMAX` so the 32-bit lane
//! sums cannot wrap before the modulo reduction.

use std::arch::x86_64::*;

use super::{Adler32Kernel, ADLER_MOD, ADLER_NMAX};

const MOD: u64 = ADLER_MOD as u64;
const LANE: usize = 32;
const CHUNK_LEN: usize = (ADLER_NMAX / LANE) * LANE;

/// Vectorized kernel.  Only obtainable through [`Avx2::detect`].
#[derive(Debug)]
pub struct Avx2 {
    _probed: (),
}

static AVX2: Avx2 = Avx2 { _probed: () };

impl Avx2 {
    /// The AVX2 kernel, if this CPU supports it.
    pub fn detect() -> Option<&'static Avx2> {
        super::has_vector_support().then_some(&AVX2)
    }
}

impl Adler32Kernel for Avx2 {
    fn name(&self) -> &'static str {
        "avx2"
    }

    fn update(&self, s1: u32, s2: u32, data: &[u8]) -> (u32, u32) {
        // SAFETY: an `Avx2` is only handed out after the CPU reported AVX2.
        unsafe { update_avx2(s1, s2, data) }
    }
}

#[target_feature(enable = "avx2")]
unsafe fn reduce_add_8x32(v: __m256i) -> u32 {
    let sum128 = _mm_add_epi32(_mm256_castsi256_si128(v), _mm256_extracti128_si256::<1>(v));
    let hi64 = _mm_unpackhi_epi64(sum128, sum128);
    let sum64 = _mm_add_epi32(hi64, sum128);
    let hi32 = _mm_shuffle_epi32::<0b10_11_00_01>(sum64);
    let sum32 = _mm_add_epi32(sum64, hi32);
    _mm_cvtsi128_si32(sum32) as u32
}

#[target_feature(enable = "avx2")]
unsafe fn update_avx2(s1: u32, s2: u32, mut data: &[u8]) -> (u32, u32) {
    let zero = _mm256_setzero_si256();
    let ones = _mm256_set1_epi16(1);
    let weights = _mm256_set_epi8(
        1,  2,  3,  4,  5,  6,  7,  8,
        9,  10, 11, 12, 13, 14, 15, 16,
        17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    );

    let mut sum = s1 as u64;
    let mut sum2 = s2 as u64;

    while data.len() >= LANE {
        let chunk_len = (data.len() - data.len() % LANE).min(CHUNK_LEN);
        let (chunk, rest) = data.split_at(chunk_len);

        let mut sum_v = _mm256_setzero_si256();
        let mut sum2_v = _mm256_setzero_si256();

        for lane in chunk.chunks_exact(LANE) {
            let bytes = _mm256_loadu_si256(lane.as_ptr() as *const __m256i);
            let mad = _mm256_maddubs_epi16(bytes, weights);
            sum2_v = _mm256_add_epi32(sum2_v, _mm256_madd_epi16(mad, ones));
            sum2_v = _mm256_add_epi32(sum2_v, _mm256_slli_epi32::<5>(sum_v));
            sum_v = _mm256_add_epi32(sum_v, _mm256_sad_epu8(bytes, zero));
        }

        sum2 += sum * chunk_len as u64;
        sum2 += reduce_add_8x32(sum2_v) as u64;
        sum += reduce_add_8x32(sum_v) as u64;

        sum %= MOD;
        sum2 %= MOD;
        data = rest;
    }

    // Fewer than 32 bytes left.
    for &b in data {
        sum += b as u64;
        sum2 += sum;
    }
    sum %= MOD;
    sum2 %= MOD;

    (sum as u32, sum2 as u32)
}
