//! Hybrid sparse/dense HyperLogLog over a caller-provided byte buffer.
//!
//! The first 8 bytes are the header; bit 7 of byte 0 is the dirty flag and
//! bit 6 the mode (1 = dense, 0 = sparse). The remaining header bits belong
//! to whichever representation is active: the sparse element count, or the
//! cached dense estimate. Both representations occupy the same buffer and
//! the buffer is the wire format, so snapshots, memory maps and network
//! copies need no serialization step.

use std::fmt::{self, Debug, Formatter};

use crate::alloc::{HeapAlloc, ScratchAlloc};
use crate::dense::{dense_size_by_error, dense_size_by_p, Dense};
use crate::error::Error;
use crate::sparse::{self, AddResult, Sparse};

/// Dirty flag: sparse payload unsorted, or cached dense estimate stale.
const DIRTY: u8 = 1 << 7;
/// Mode flag: set once the buffer holds dense registers, never cleared.
const DENSE: u8 = 1 << 6;
/// Bytes reserved for the header at the start of the buffer.
const HEADER_LEN: usize = 8;
/// Dirty and validity bits inside the big-endian header word.
const CACHE_FLAGS: u64 = 1 << 63 | 1 << 62;
/// Validity marker of the cached estimate; doubles as the mode bit.
const CACHE_VALID: u64 = 1 << 62;

/// Byte size of a buffer (header included) for precision `p`.
///
/// Precision must be between 4 and 25, inclusive.
pub fn size_by_p(p: u8) -> Result<usize, Error> {
    Ok(dense_size_by_p(p)? + HEADER_LEN)
}

/// Byte size of a buffer (header included) for a target relative error.
///
/// The error rate must be between 0.00025390625 and 0.26, inclusive.
pub fn size_by_error(error_rate: f64) -> Result<usize, Error> {
    Ok(dense_size_by_error(error_rate)? + HEADER_LEN)
}

/// Check the structural invariants of a buffer.
///
/// Accepts any buffer [`Hll::new`] would accept: a length of 8 plus three
/// times a power of two, a derived precision in `[4, 25]`, and in sparse
/// mode a stored count within capacity.
pub fn validate(buf: &[u8]) -> Result<(), Error> {
    if buf.len() < HEADER_LEN {
        return Err(Error::MalformedBuffer("size too small"));
    }
    let payload = buf.len() - HEADER_LEN;
    if payload % 3 != 0 {
        return Err(Error::MalformedBuffer(
            "length must be 8 plus a multiple of 3",
        ));
    }
    let m = (payload / 3) << 2;
    if !m.is_power_of_two() {
        return Err(Error::MalformedBuffer(
            "register count must be a power of two",
        ));
    }
    let p = m.trailing_zeros();
    if !(4..=25).contains(&p) {
        return Err(Error::MalformedBuffer("derived precision out of range"));
    }
    if buf[0] & DENSE == 0 && sparse::count(buf) as usize > payload / 8 {
        return Err(Error::MalformedBuffer("sparse count exceeds capacity"));
    }
    Ok(())
}

/// Hybrid HyperLogLog view over a borrowed buffer.
///
/// A zeroed buffer of a valid size is an empty sparse estimator; feeding it
/// hashes keeps an exact deduplicated set until the sparse encoding no
/// longer fits, then promotes in place to dense registers of the same byte
/// size. The transition is silent, one-way, and the only operation that
/// allocates (a transient scratch payload obtained through `A`).
pub struct Hll<'a, A: ScratchAlloc = HeapAlloc> {
    buf: &'a mut [u8],
    alloc: A,
}

impl<'a> Hll<'a, HeapAlloc> {
    /// Wrap a buffer, validating its shape. Heap-allocated promotion scratch.
    pub fn new(buf: &'a mut [u8]) -> Result<Self, Error> {
        Self::with_allocator(buf, HeapAlloc)
    }
}

impl<'a, A: ScratchAlloc> Hll<'a, A> {
    /// Wrap a buffer, validating its shape, with a custom scratch allocator.
    pub fn with_allocator(buf: &'a mut [u8], alloc: A) -> Result<Self, Error> {
        validate(buf)?;
        Ok(Self { buf, alloc })
    }

    /// Record one 64-bit hash.
    ///
    /// Use a well-mixed hash function; the estimator consumes the hash bits
    /// directly. A sparse buffer that runs out of room promotes to dense and
    /// retries, so the call never fails.
    pub fn add(&mut self, hash: u64) {
        if self.is_dense() {
            if Dense::new(&mut self.buf[HEADER_LEN..]).add(hash) {
                self.buf[0] |= DIRTY;
            }
            return;
        }
        if Sparse::new(&mut self.buf[..]).add(hash) == AddResult::Full {
            self.promote();
            Dense::new(&mut self.buf[HEADER_LEN..]).add(hash);
        }
    }

    /// Merge another estimator of the same precision into this one.
    ///
    /// Fails only on a buffer length mismatch. A sparse self that overflows
    /// mid-merge promotes to dense and finishes there.
    pub fn merge<B: ScratchAlloc>(&mut self, other: &Hll<'_, B>) -> Result<(), Error> {
        if self.buf.len() != other.buf.len() {
            return Err(Error::SizeMismatch);
        }
        match (self.is_dense(), other.is_dense()) {
            (true, true) => {
                Dense::new(&mut self.buf[HEADER_LEN..]).merge(&other.buf[HEADER_LEN..]);
                self.buf[0] |= DIRTY;
            }
            (true, false) => {
                self.replay_dense(other.buf);
                self.buf[0] |= DIRTY;
            }
            (false, true) => {
                self.promote();
                Dense::new(&mut self.buf[HEADER_LEN..]).merge(&other.buf[HEADER_LEN..]);
            }
            (false, false) => {
                if self.replay_sparse(other.buf) == AddResult::Full {
                    self.promote();
                    self.replay_dense(other.buf);
                }
            }
        }
        Ok(())
    }

    /// Cardinality estimate: exact while sparse, cached or recomputed while
    /// dense.
    ///
    /// Observably mutates the buffer when dirty: a sparse buffer gets its
    /// deferred sort, a dense one gets the recomputed estimate written back
    /// to the header (unless it exceeds the 62-bit cache, in which case the
    /// buffer stays dirty and later calls recompute).
    pub fn estimate_cardinality(&mut self) -> u64 {
        if !self.is_dense() {
            return Sparse::new(&mut self.buf[..]).estimate_cardinality();
        }
        if self.buf[0] & DIRTY == 0 {
            return self.header_word() & !CACHE_FLAGS;
        }
        let card = Dense::new(&mut self.buf[HEADER_LEN..]).estimate_cardinality();
        if card & CACHE_FLAGS != 0 {
            return card;
        }
        self.buf[..HEADER_LEN].copy_from_slice(&(card | CACHE_VALID).to_be_bytes());
        card
    }

    /// True while the buffer is sparse and the estimate therefore exact.
    #[inline]
    pub fn is_sparse(&self) -> bool {
        self.buf[0] & DENSE == 0
    }

    /// Restore the empty sparse state.
    pub fn reset(&mut self) {
        self.buf.fill(0);
    }

    /// Precision `P` derived from the buffer length.
    #[inline]
    pub fn precision(&self) -> u8 {
        (((self.buf.len() - HEADER_LEN) / 3) << 2).trailing_zeros() as u8
    }

    /// The underlying buffer; also the on-wire and on-disk format.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.buf
    }

    #[inline]
    fn is_dense(&self) -> bool {
        self.buf[0] & DENSE != 0
    }

    #[inline]
    fn header_word(&self) -> u64 {
        u64::from_be_bytes(self.buf[..HEADER_LEN].try_into().unwrap())
    }

    /// Replay another sparse buffer's stored hashes into our sparse engine,
    /// stopping at the first refused append.
    fn replay_sparse(&mut self, other_buf: &[u8]) -> AddResult {
        let mut engine = Sparse::new(&mut self.buf[..]);
        for hash in sparse::stored_hashes(other_buf) {
            if engine.add(hash) == AddResult::Full {
                return AddResult::Full;
            }
        }
        AddResult::Ok
    }

    /// Replay another sparse buffer's stored hashes into our dense engine.
    fn replay_dense(&mut self, other_buf: &[u8]) {
        let mut engine = Dense::new(&mut self.buf[HEADER_LEN..]);
        for hash in sparse::stored_hashes(other_buf) {
            engine.add(hash);
        }
    }

    /// One-way sparse-to-dense transition, in place.
    ///
    /// Replays the stored hashes into a scratch register payload, copies it
    /// over the sparse payload, and rewrites the header as dense and dirty
    /// with every other bit zero.
    fn promote(&mut self) {
        let payload_len = self.buf.len() - HEADER_LEN;
        let mut scratch = self.alloc.alloc(payload_len);
        debug_assert_eq!(scratch.len(), payload_len);
        let mut registers = Dense::new(&mut scratch);
        for hash in sparse::stored_hashes(self.buf) {
            registers.add(hash);
        }
        self.buf[HEADER_LEN..].copy_from_slice(&scratch);
        self.alloc.free(scratch);
        self.buf[..HEADER_LEN].fill(0);
        self.buf[0] = DIRTY | DENSE;
    }
}

impl<A: ScratchAlloc> Debug for Hll<'_, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hll")
            .field("precision", &self.precision())
            .field("sparse", &self.is_sparse())
            .field("bytes", &self.buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(4, 20)]
    #[test_case(8, 200)]
    #[test_case(14, 12_296)]
    #[test_case(25, 25_165_832)]
    fn buffer_sizes(p: u8, expected: usize) {
        assert_eq!(size_by_p(p).unwrap(), expected);
    }

    #[test_case(3)]
    #[test_case(26)]
    fn rejects_bad_precision(p: u8) {
        assert_eq!(size_by_p(p), Err(Error::InvalidPrecision));
    }

    #[test]
    fn size_by_error_adds_header() {
        assert_eq!(size_by_error(0.26).unwrap(), size_by_p(4).unwrap());
        assert_eq!(size_by_error(0.00001), Err(Error::InvalidErrorRate));
        assert_eq!(size_by_error(0.3), Err(Error::InvalidErrorRate));
    }

    #[test]
    fn validate_accepts_every_precision_and_mode() {
        for p in 4..=25u8 {
            let mut buf = vec![0u8; size_by_p(p).unwrap()];
            validate(&buf).unwrap();
            // Preset dense, dirty.
            buf[0] = 0xC0;
            validate(&buf).unwrap();
            // Sparse with counts up to capacity.
            buf.fill(0);
            let capacity = (buf.len() - 8) as u32 / 8;
            for count in [1, capacity] {
                buf[..4].copy_from_slice(&count.to_be_bytes());
                validate(&buf).unwrap();
            }
            buf[..4].copy_from_slice(&(capacity + 1).to_be_bytes());
            assert_eq!(
                validate(&buf),
                Err(Error::MalformedBuffer("sparse count exceeds capacity")),
                "p={p}"
            );
        }
    }

    #[test_case(0; "empty")]
    #[test_case(4; "below header")]
    #[test_case(8; "header only")]
    #[test_case(9; "payload not multiple of three")]
    #[test_case(12; "payload not multiple of three either")]
    #[test_case(14; "precision too small")]
    #[test_case(17; "registers not a power of two")]
    fn validate_rejects_bad_lengths(len: usize) {
        let buf = vec![0u8; len];
        assert!(validate(&buf).is_err());
    }

    #[test]
    fn construction_validates() {
        let mut buf = vec![0u8; 21];
        assert!(Hll::new(&mut buf).is_err());
        let mut buf = vec![0u8; size_by_p(8).unwrap()];
        assert!(Hll::new(&mut buf).is_ok());
    }

    #[test]
    fn precision_round_trips() {
        for p in 4..=25u8 {
            let mut buf = vec![0u8; size_by_p(p).unwrap()];
            assert_eq!(Hll::new(&mut buf).unwrap().precision(), p);
        }
    }

    #[test]
    fn reset_restores_the_empty_sparse_state() {
        let mut buf = vec![0u8; size_by_p(8).unwrap()];
        let mut hll = Hll::new(&mut buf).unwrap();
        for hash in 0..400u64 {
            hll.add(hash << 32 | 1);
        }
        assert!(!hll.is_sparse());
        hll.reset();
        assert!(hll.is_sparse());
        assert_eq!(hll.estimate_cardinality(), 0);
        assert!(hll.as_bytes().iter().all(|&b| b == 0));
    }
}
