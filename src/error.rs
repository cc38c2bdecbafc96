//! Error type shared by buffer construction, validation and merge.

use std::fmt;

/// Errors surfaced by `hllbuf` operations.
///
/// `add` and `estimate_cardinality` never fail on a validated buffer; the
/// sparse overflow path promotes to dense silently instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Precision outside the supported `[4, 25]` range.
    InvalidPrecision,
    /// Error rate outside the supported `[0.00025390625, 0.26]` range.
    InvalidErrorRate,
    /// `merge` called on buffers of different lengths.
    SizeMismatch,
    /// A structural invariant of the buffer layout does not hold.
    MalformedBuffer(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPrecision => {
                write!(f, "precision must be between 4 and 25, inclusive")
            }
            Error::InvalidErrorRate => {
                write!(
                    f,
                    "error rate must be between 0.00025390625 and 0.26, inclusive"
                )
            }
            Error::SizeMismatch => write!(f, "buffer size mismatch"),
            Error::MalformedBuffer(reason) => write!(f, "malformed buffer: {reason}"),
        }
    }
}

impl std::error::Error for Error {}
