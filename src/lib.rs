//! `hllbuf` estimates the number of distinct 64-bit hashes fed into it, with
//! the entire state held in a single caller-provided byte buffer of fixed
//! size. The buffer is the serialized form: it can live in a memory map, an
//! arena slot or a network frame and is operated on in place.
//!
//! # Hybrid representation
//!
//! A buffer of `8 + 3 * 2^(P-2)` bytes (precision `P` in `[4, 25]`) starts
//! sparse: a deduplicated list of raw hashes with an exact count, sorted
//! lazily under a dirty flag. Once the list no longer fits, the buffer is
//! promoted in place to a dense array of `2^P` packed 6-bit HyperLogLog
//! registers occupying exactly the same bytes, and the header word doubles
//! as a cache for the latest estimate. Promotion is silent and one-way.
//!
//! The caller supplies the hashes; any well-mixed 64-bit hash function
//! works.
//!
//! ```
//! let mut buf = vec![0u8; hllbuf::size_by_p(12).unwrap()];
//! let mut hll = hllbuf::Hll::new(&mut buf).unwrap();
//! hll.add(0x9e3779b97f4a7c15);
//! hll.add(0x9e3779b97f4a7c15);
//! hll.add(0xbf58476d1ce4e5b9);
//! assert!(hll.is_sparse());
//! assert_eq!(hll.estimate_cardinality(), 2);
//! ```
mod alloc;
mod bias;
mod dense;
mod error;
mod hll;
#[cfg(feature = "with_serde")]
mod serde;
mod sparse;

pub use crate::alloc::{HeapAlloc, ScratchAlloc};
pub use crate::dense::{dense_size_by_error, dense_size_by_p, expected_error};
pub use crate::error::Error;
pub use crate::hll::{size_by_error, size_by_p, validate, Hll};
#[cfg(feature = "with_serde")]
pub use crate::serde::deserialize_buffer;
