//! ## Sparse representation
//!
//! A deduplicated set of raw 64-bit hashes kept inside the same buffer the
//! dense registers will later occupy, so the estimate stays exact until the
//! encoding runs out of room.
//!
//! The element count lives in bits 0..30 of the big-endian u32 at bytes 0..4
//! (bit 31 is the dirty flag shared with the header). Elements are stored as
//! little-endian u64 values, element `k` at bytes `8k..8k+8`; slot 0 is
//! occupied by the header, which caps capacity at `len/8 - 1`.
//!
//! Appends only write the new element and flip the dirty flag. While dirty
//! the payload may be unordered and contain duplicates; `sort` restores the
//! clean form (byte-wise ascending, unique, freed tail zeroed) and is
//! deferred until an append runs out of room or an estimate is requested.

/// Dirty flag in the big-endian count word.
const DIRTY: u32 = 1 << 31;

/// Low 30 bits of the count word hold the element count.
const COUNT_MASK: u32 = (1 << 30) - 1;

/// Appends stop re-sorting this many slots before capacity, so a buffer
/// hovering near full does not pay a sort per insert.
const SORT_SLACK: u32 = 100;

/// Outcome of a sparse append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddResult {
    Ok,
    Full,
}

/// Stored element count of a sparse buffer.
#[inline]
pub(crate) fn count(buf: &[u8]) -> u32 {
    u32::from_be_bytes(buf[..4].try_into().unwrap()) & COUNT_MASK
}

/// Iterate the stored hashes of a sparse buffer, duplicates included when
/// the buffer is dirty.
pub(crate) fn stored_hashes(buf: &[u8]) -> impl Iterator<Item = u64> + '_ {
    let n = count(buf) as usize;
    buf[8..8 + 8 * n]
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
}

/// Sparse engine over the whole borrowed buffer (header included).
pub(crate) struct Sparse<'a> {
    buf: &'a mut [u8],
}

impl<'a> Sparse<'a> {
    #[inline]
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    #[inline]
    fn count(&self) -> u32 {
        count(self.buf)
    }

    #[inline]
    fn dirty(&self) -> bool {
        self.buf[0] & 0x80 != 0
    }

    #[inline]
    fn set_count(&mut self, n: u32) {
        self.buf[..4].copy_from_slice(&n.to_be_bytes());
    }

    #[inline]
    fn put(&mut self, slot: u32, hash: u64) {
        let at = slot as usize * 8;
        self.buf[at..at + 8].copy_from_slice(&hash.to_le_bytes());
    }

    /// Append a hash, deferring deduplication to the next sort.
    ///
    /// When the payload is full and dirty, sorts first and retries; the
    /// append then only proceeds if it leaves [`SORT_SLACK`] free slots, so a
    /// near-full buffer reports `Full` instead of sorting on every call.
    pub(crate) fn add(&mut self, hash: u64) -> AddResult {
        let slots = (self.buf.len() >> 3) as u32;
        let mut n = self.count() + 1;
        if n < slots {
            self.put(n, hash);
            self.set_count(n | DIRTY);
            return AddResult::Ok;
        }
        if !self.dirty() {
            return AddResult::Full;
        }
        self.sort();
        n = self.count();
        if n + SORT_SLACK < slots {
            n += 1;
            self.put(n, hash);
            self.set_count(n | DIRTY);
            return AddResult::Ok;
        }
        AddResult::Full
    }

    /// Exact number of distinct hashes stored.
    pub(crate) fn estimate_cardinality(&mut self) -> u64 {
        if self.dirty() {
            self.sort();
        }
        self.count() as u64
    }

    /// Sort the payload byte-wise ascending, drop duplicates, zero the freed
    /// tail and clear the dirty flag.
    ///
    /// The tail is zeroed for layout stability: a clean buffer's bytes are a
    /// pure function of its hash set.
    pub(crate) fn sort(&mut self) {
        let n = self.count() as usize;
        let payload = &mut self.buf[8..8 + 8 * n];
        let (keys, rest) = payload.as_chunks_mut::<8>();
        debug_assert!(rest.is_empty());
        keys.sort_unstable();
        let mut kept = n.min(1);
        for i in 1..n {
            if keys[i] != keys[kept - 1] {
                keys[kept] = keys[i];
                kept += 1;
            }
        }
        self.buf[8 + 8 * kept..8 + 8 * n].fill(0);
        self.set_count(kept as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::size_by_p;

    fn buffer(p: u8) -> Vec<u8> {
        vec![0u8; size_by_p(p).unwrap()]
    }

    #[test]
    fn append_defers_sorting() {
        let mut buf = buffer(8);
        let mut sparse = Sparse::new(&mut buf);
        for hash in [7u64, 3, 7, 1] {
            assert_eq!(sparse.add(hash), AddResult::Ok);
        }
        assert!(sparse.dirty());
        assert_eq!(sparse.count(), 4);
        assert_eq!(sparse.estimate_cardinality(), 3);
        assert!(!sparse.dirty());
    }

    #[test]
    fn sort_orders_and_zeroes_the_tail() {
        let mut buf = buffer(8);
        let mut sparse = Sparse::new(&mut buf);
        for hash in [0xdead_beefu64, 0x1, 0xdead_beef, 0x1, 0xffff] {
            sparse.add(hash);
        }
        sparse.sort();
        assert_eq!(sparse.count(), 3);
        let stored: Vec<[u8; 8]> = buf[8..8 + 8 * 5]
            .chunks_exact(8)
            .map(|c| c.try_into().unwrap())
            .collect();
        assert!(stored[0] < stored[1] && stored[1] < stored[2]);
        assert_eq!(stored[3], [0u8; 8]);
        assert_eq!(stored[4], [0u8; 8]);
    }

    #[test]
    fn capacity_is_one_slot_short_of_the_buffer() {
        // p = 4: 20 bytes, 2 slots, one reserved for the header.
        let mut buf = buffer(4);
        let mut sparse = Sparse::new(&mut buf);
        assert_eq!(sparse.add(1), AddResult::Ok);
        assert_eq!(sparse.add(2), AddResult::Full);
        // A clean full buffer reports full without re-sorting.
        assert_eq!(sparse.add(3), AddResult::Full);
    }

    #[test]
    fn full_dirty_buffer_dedups_and_retries() {
        // p = 13: 6152 bytes, 769 slots, 768 usable.
        let mut buf = buffer(13);
        let mut sparse = Sparse::new(&mut buf);
        for _ in 0..768 {
            assert_eq!(sparse.add(42), AddResult::Ok);
        }
        // Payload is physically full of duplicates; the retry sorts down to
        // one element and appends.
        assert_eq!(sparse.add(43), AddResult::Ok);
        assert_eq!(sparse.estimate_cardinality(), 2);
    }

    #[test]
    fn near_full_buffer_keeps_slack() {
        let mut buf = buffer(13);
        let mut sparse = Sparse::new(&mut buf);
        for i in 0..768u64 {
            assert_eq!(sparse.add(i), AddResult::Ok);
        }
        // 768 distinct elements survive the sort; within the 100-slot slack
        // the append is refused even though one physical slot is free.
        assert_eq!(sparse.add(768), AddResult::Full);
        assert_eq!(sparse.estimate_cardinality(), 768);
    }

    #[test]
    fn stored_hashes_round_trip() {
        let mut buf = buffer(8);
        let mut sparse = Sparse::new(&mut buf);
        for hash in [5u64, 9, 5] {
            sparse.add(hash);
        }
        let seen: Vec<u64> = stored_hashes(&buf).collect();
        assert_eq!(seen, vec![5, 9, 5]);
    }
}
