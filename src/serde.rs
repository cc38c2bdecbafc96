//! Serde support for `Hll` (behind the `with_serde` feature).
//!
//! The buffer already is the wire format, so serialization emits its raw
//! bytes unchanged. `Hll` borrows its buffer and therefore cannot implement
//! `Deserialize` itself; [`deserialize_buffer`] produces an owned, validated
//! buffer instead, ready to be wrapped with [`Hll::new`] or stored in a
//! field via `#[serde(deserialize_with = "hllbuf::deserialize_buffer")]`.

use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserializer, Serialize, Serializer};

use crate::alloc::ScratchAlloc;
use crate::hll::{validate, Hll};

impl<A: ScratchAlloc> Serialize for Hll<'_, A> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(self.as_bytes())
    }
}

/// Deserialize a byte buffer and validate it as a well-formed estimator.
pub fn deserialize_buffer<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    struct BufVisitor;

    impl<'de> Visitor<'de> for BufVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an hllbuf byte buffer")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        // Human-readable formats represent bytes as a sequence.
        fn visit_seq<S: SeqAccess<'de>>(self, mut seq: S) -> Result<Self::Value, S::Error> {
            let mut buf = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                buf.push(byte);
            }
            Ok(buf)
        }
    }

    let buf = deserializer.deserialize_byte_buf(BufVisitor)?;
    validate(&buf).map_err(de::Error::custom)?;
    Ok(buf)
}
