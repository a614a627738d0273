//! Rolling integrity checksum over decompressed container content.
//!
//! # Algorithms
//! The checksum algorithm id is written into byte 5 of every header:
//!
//! | id | algorithm | `finish()` |
//! |----|-----------|------------|
//! | 0  | none      | always `0` |
//! | 1  | Adler-32  | `(s1 << 16) \| s2`, modulus 65521, seed `s1 = 1, s2 = 0` |
//!
//! # Kernels
//! Adler-32 updates run through an [`Adler32Kernel`].  The kernel is picked
//! once per process by [`select_kernel`]: the AVX2 kernel when the CPU
//! reports support, the scalar one otherwise.  Both return canonical
//! `(s1, s2)` pairs, so results are bit-identical whichever kernel ran.

mod scalar;
#[cfg(target_arch = "x86_64")]
mod avx2;

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

pub use scalar::Scalar;
#[cfg(target_arch = "x86_64")]
pub use avx2::Avx2;

pub const ADLER_MOD: u32 = 65521;
/// Largest run of bytes for which `s2` cannot overflow 32 bits before reduction.
pub const ADLER_NMAX: usize = 5552;

/// Wire identity of a checksum algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ChecksumAlgo {
    None    = 0,
    Adler32 = 1,
}

impl ChecksumAlgo {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(ChecksumAlgo::None),
            1 => Some(ChecksumAlgo::Adler32),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlgo::None    => "none",
            ChecksumAlgo::Adler32 => "adler32",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none"              => Some(ChecksumAlgo::None),
            "adler32" | "adler" => Some(ChecksumAlgo::Adler32),
            _                   => None,
        }
    }
}

/// An Adler-32 update routine.
///
/// Takes the current `(s1, s2)` accumulators, both `< ADLER_MOD`, and returns
/// the accumulators after absorbing `data`, again both `< ADLER_MOD`.
pub trait Adler32Kernel: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn update(&self, s1: u32, s2: u32, data: &[u8]) -> (u32, u32);
}

/// Whether the host can run the vectorized kernel.  Probed once.
pub fn has_vector_support() -> bool {
    static PROBE: OnceLock<bool> = OnceLock::new();
    *PROBE.get_or_init(|| {
        #[cfg(target_arch = "x86_64")]
        {
            std::arch::is_x86_feature_detected!("avx2")
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            false
        }
    })
}

/// The kernel every new [`Checksum::Adler32`] state uses.
pub fn select_kernel() -> &'static dyn Adler32Kernel {
    static KERNEL: OnceLock<&'static dyn Adler32Kernel> = OnceLock::new();
    *KERNEL.get_or_init(|| -> &'static dyn Adler32Kernel {
        #[cfg(target_arch = "x86_64")]
        {
            if let Some(k) = Avx2::detect() {
                tracing::debug!(kernel = k.name(), "adler32 kernel selected");
                return k;
            }
        }
        tracing::debug!(kernel = Scalar.name(), "adler32 kernel selected");
        &Scalar
    })
}

/// Checksum accumulator, tagged by algorithm.
#[derive(Debug, Clone, Copy)]
pub enum Checksum {
    None,
    Adler32 {
        s1:     u32,
        s2:     u32,
        kernel: &'static dyn Adler32Kernel,
    },
}

impl Checksum {
    pub fn new(algo: ChecksumAlgo) -> Self {
        match algo {
            ChecksumAlgo::None    => Checksum::None,
            ChecksumAlgo::Adler32 => Self::adler32_with(select_kernel()),
        }
    }

    /// Adler-32 state pinned to a specific kernel.
    pub fn adler32_with(kernel: &'static dyn Adler32Kernel) -> Self {
        Checksum::Adler32 { s1: 1, s2: 0, kernel }
    }

    pub fn algorithm(&self) -> ChecksumAlgo {
        match self {
            Checksum::None            => ChecksumAlgo::None,
            Checksum::Adler32 { .. }  => ChecksumAlgo::Adler32,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Checksum::None => {}
            Checksum::Adler32 { s1, s2, kernel } => {
                (*s1, *s2) = kernel.update(*s1, *s2, data);
            }
        }
    }

    pub fn finish(&self) -> u32 {
        match self {
            Checksum::None => 0,
            Checksum::Adler32 { s1, s2, .. } => (*s1 << 16) | *s2,
        }
    }
}

/// One-shot Adler-32 of `data` using the selected kernel.
pub fn adler32(data: &[u8]) -> u32 {
    let mut cs = Checksum::new(ChecksumAlgo::Adler32);
    cs.update(data);
    cs.finish()
}
