//! ## Dense representation
//!
//! Fixed-size HyperLogLog over `m = 2^P` packed 6-bit registers, following
//! the bias-corrected estimator with linear-counting fallback from the
//! HyperLogLog++ paper (without its sparse encoding).
//!
//! Four registers are packed into every three bytes:
//!
//! ```text
//! byte 0: a5 a4 a3 a2 a1 a0 d5 d4
//! byte 1: b5 b4 b3 b2 b1 b0 d3 d2
//! byte 2: c5 c4 c3 c2 c1 c0 d1 d0
//! ```
//!
//! Registers `a`, `b`, `c` occupy the high six bits of their byte; register
//! `d` is scattered across the low two bits of all three bytes, high-order
//! pair first. All operations are in place and allocation-free.

use crate::bias::estimate_bias;
use crate::error::Error;

/// Precomputed `2^(-x)` for every reachable register value.
const INV_POW2: [f64; 64] = {
    let mut table = [0.0f64; 64];
    let mut i = 0;
    while i < 64 {
        table[i] = f64::from_bits((1023 - i as u64) << 52);
        i += 1;
    }
    table
};

/// Mask selecting the low two bits of a byte, where register `d` lives.
const LOW2: u8 = 3;

/// Dense register array over a borrowed payload (no header).
pub(crate) struct Dense<'a> {
    data: &'a mut [u8],
}

/// Byte size of a dense register payload for precision `p`.
///
/// Precision must be between 4 and 25, inclusive.
pub fn dense_size_by_p(p: u8) -> Result<usize, Error> {
    if !(4..=25).contains(&p) {
        return Err(Error::InvalidPrecision);
    }
    Ok((3usize << p) >> 2)
}

/// Byte size of a dense register payload for a target relative error.
///
/// The error rate must be between 0.00025390625 and 0.26, inclusive.
pub fn dense_size_by_error(error_rate: f64) -> Result<usize, Error> {
    if !(0.00025390625..=0.26).contains(&error_rate) {
        return Err(Error::InvalidErrorRate);
    }
    let p = (1.04 / error_rate).powi(2).log2().ceil() as u8;
    dense_size_by_p(p)
}

/// Expected relative error of a dense estimator with precision `p`.
pub fn expected_error(p: u8) -> f64 {
    1.04 / ((1u64 << p) as f64).sqrt()
}

impl<'a> Dense<'a> {
    #[inline]
    pub(crate) fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Number of registers.
    #[inline]
    pub(crate) fn m(&self) -> usize {
        (self.data.len() / 3) << 2
    }

    /// Precision derived from the register count.
    #[inline]
    fn p(&self) -> u8 {
        self.m().trailing_zeros() as u8
    }

    /// Get the 6-bit register at `idx`.
    #[inline]
    pub(crate) fn get(&self, idx: usize) -> u8 {
        let base = (idx >> 2) * 3;
        let slot = idx & 3;
        if slot != 3 {
            return self.data[base + slot] >> 2;
        }
        let (x0, x1, x2) = (self.data[base], self.data[base + 1], self.data[base + 2]);
        ((x0 & LOW2) << 4) ^ ((x1 & LOW2) << 2) ^ (x2 & LOW2)
    }

    /// Set the 6-bit register at `idx` to `v` (only the low six bits count).
    #[inline]
    pub(crate) fn set(&mut self, idx: usize, v: u8) {
        let base = (idx >> 2) * 3;
        let slot = idx & 3;
        if slot != 3 {
            self.data[base + slot] = (self.data[base + slot] & LOW2) ^ (v << 2);
        } else {
            self.data[base] = (self.data[base] & !LOW2) ^ (v >> 4);
            self.data[base + 1] = (self.data[base + 1] & !LOW2) ^ ((v >> 2) & LOW2);
            self.data[base + 2] = (self.data[base + 2] & !LOW2) ^ (v & LOW2);
        }
    }

    /// Record one hash. Returns whether a register grew, i.e. whether the
    /// cardinality estimate may have changed.
    ///
    /// The low `P` bits pick the register and the leading zeros of the whole
    /// 64-bit hash feed the rank. Counting zeros over the full hash rather
    /// than the index-stripped one skews the rank distribution slightly;
    /// estimates depend on it, so it stays.
    #[inline]
    pub(crate) fn add(&mut self, hash: u64) -> bool {
        let idx = (hash & (self.m() as u64 - 1)) as usize;
        let rho = (hash.leading_zeros() as u8 + 1).min(63);
        if self.get(idx) < rho {
            self.set(idx, rho);
            return true;
        }
        false
    }

    /// Merge another payload of the same length by taking the elementwise
    /// register maximum.
    ///
    /// Registers `a`, `b`, `c` compare directly in the high six bits of
    /// their byte; register `d` is reassembled, compared and written back
    /// whole.
    pub(crate) fn merge(&mut self, other: &[u8]) {
        debug_assert_eq!(self.data.len(), other.len());
        for (x, y) in self.data.chunks_exact_mut(3).zip(other.chunks_exact(3)) {
            let (xl0, xl1, xl2) = (x[0] & LOW2, x[1] & LOW2, x[2] & LOW2);
            let (yl0, yl1, yl2) = (y[0] & LOW2, y[1] & LOW2, y[2] & LOW2);
            let r0 = (x[0] & !LOW2).max(y[0] & !LOW2);
            let r1 = (x[1] & !LOW2).max(y[1] & !LOW2);
            let r2 = (x[2] & !LOW2).max(y[2] & !LOW2);
            let xd = (xl0 << 4) ^ (xl1 << 2) ^ xl2;
            let yd = (yl0 << 4) ^ (yl1 << 2) ^ yl2;
            if xd > yd {
                x[0] = r0 ^ xl0;
                x[1] = r1 ^ xl1;
                x[2] = r2 ^ xl2;
            } else {
                x[0] = r0 ^ yl0;
                x[1] = r1 ^ yl1;
                x[2] = r2 ^ yl2;
            }
        }
    }

    /// Bias-corrected cardinality estimate with linear-counting fallback.
    pub(crate) fn estimate_cardinality(&self) -> u64 {
        let mut zeros = 0usize;
        let mut inv_sum = 0f64;
        for group in self.data.chunks_exact(3) {
            let v0 = group[0] >> 2;
            let v1 = group[1] >> 2;
            let v2 = group[2] >> 2;
            let v3 = ((group[0] & LOW2) << 4) ^ ((group[1] & LOW2) << 2) ^ (group[2] & LOW2);
            inv_sum += INV_POW2[v0 as usize];
            inv_sum += INV_POW2[v1 as usize];
            inv_sum += INV_POW2[v2 as usize];
            inv_sum += INV_POW2[v3 as usize];
            zeros += (v0 == 0) as usize;
            zeros += (v1 == 0) as usize;
            zeros += (v2 == 0) as usize;
            zeros += (v3 == 0) as usize;
        }
        let est = self.corrected_estimate(inv_sum, zeros);
        // Truncation after the +0.5 rounds to nearest and saturates on
        // overflow.
        (est + 0.5) as u64
    }

    fn corrected_estimate(&self, inv_sum: f64, zeros: usize) -> f64 {
        let m = self.m();
        let mf = m as f64;
        let mut e = alpha(m) * mf * mf / inv_sum;
        if e < 5.0 * mf {
            e -= estimate_bias(e, self.p());
        }
        let h = if zeros != 0 {
            linear_counting(m, zeros)
        } else {
            e
        };
        if h <= threshold(m) {
            h
        } else {
            e
        }
    }
}

/// HyperLogLog normalization constant.
#[inline]
fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / (m as f64)),
    }
}

/// Crossover point between linear counting and the corrected raw estimate.
///
/// Tuned values, not the ones from the paper.
fn threshold(m: usize) -> f64 {
    match m {
        0x10 => 13.0,
        0x20 => 40.0,
        0x40 => 70.0,
        0x80 => 180.0,
        0x100 => 225.0,
        0x200 => 1000.0,
        0x400 => 1750.0,
        0x800 => 4600.0,
        0x1000 => 10_000.0,
        0x2000 => 22_000.0,
        0x4000 => 45_000.0,
        0x8000 => 80_000.0,
        0x1_0000 => 150_000.0,
        0x2_0000 => 400_000.0,
        0x4_0000 => 700_000.0,
        0x8_0000 => 1_850_000.0,
        0x10_0000 => 4_200_000.0,
        _ => (m as f64) * 8.0,
    }
}

/// Linear counting over `m` registers of which `zeros` are still empty.
#[inline]
fn linear_counting(m: usize, zeros: usize) -> f64 {
    let mf = m as f64;
    mf * (mf / zeros as f64).ln()
}
