use super::{Adler32Kernel, ADLER_MOD};

const MOD: u64 = ADLER_MOD as u64;

/// Portable Adler-32: a ragged head brings the remaining length to a multiple
/// of eight, then eight bytes per iteration with `s2` reduced every 32 KiB.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scalar;

impl Adler32Kernel for Scalar {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn update(&self, s1: u32, s2: u32, data: &[u8]) -> (u32, u32) {
        let mut s1 = s1 as u64;
        let mut s2 = s2 as u64;

        let (head, body) = data.split_at(data.len() % 8);
        if !head.is_empty() {
            for &b in head {
                s1 += b as u64;
                s2 += s1;
            }
            if s1 >= MOD {
                s1 -= MOD;
            }
            s2 %= MOD;
        }

        let mut remaining = body.len();
        for group in body.chunks_exact(8) {
            s1 += group[0] as u64; s2 += s1;
            s1 += group[1] as u64; s2 += s1;
            s1 += group[2] as u64; s2 += s1;
            s1 += group[3] as u64; s2 += s1;
            s1 += group[4] as u64; s2 += s1;
            s1 += group[5] as u64; s2 += s1;
            s1 += group[6] as u64; s2 += s1;
            s1 += group[7] as u64; s2 += s1;

            remaining -= 8;
            if s1 >= MOD {
                s1 -= MOD;
            }
            if remaining % 0x8000 == 0 {
                s2 %= MOD;
            }
        }

        debug_assert!(s1 < MOD && s2 < MOD);
        (s1 as u32, s2 as u32)
    }
}
