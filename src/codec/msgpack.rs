//! Typed MsgPack codec using `rmp-serde`.
//!
//! Tarantool tuples are positional, so structs are serialized with
//! `rmp_serde::to_vec` (struct-as-array), NOT `to_vec_named`. A struct
//! `{ id: 1, name: "Music" }` becomes the tuple `[1, "Music"]`, which is what
//! the server stores and returns.
//!
//! # Example
//!
//! ```
//! use iproto_client::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Record {
//!     id: u64,
//!     name: String,
//! }
//!
//! let rec = Record { id: 2, name: "Music".to_string() };
//! let encoded = MsgPackCodec::encode(&rec).unwrap();
//! assert_eq!(encoded[0], 0x92); // fixarray with 2 elements
//! let decoded: Record = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, rec);
//! ```

use super::value::{decode_value, Value};
use crate::error::{CodecError, CodecResult};

/// MessagePack codec for user types.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (structs as arrays).
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
        rmp_serde::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::malformed(e.to_string()))
    }

    /// Serialize a user type into a tuple of [`Value`]s.
    ///
    /// The type must serialize to a MsgPack array (a struct, tuple or
    /// sequence).
    pub fn to_tuple<T: serde::Serialize + ?Sized>(value: &T) -> CodecResult<Vec<Value>> {
        let encoded = Self::encode(value)?;
        match decode_value(&encoded)?.0 {
            Value::Array(items) => Ok(items),
            other => Err(CodecError::Encode(format!(
                "expected a tuple-shaped value, got {:?}",
                other
            ))),
        }
    }
}
