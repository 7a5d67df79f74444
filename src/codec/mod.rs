//! Codec module - MessagePack values and typed payloads.
//!
//! - [`Value`] with [`encode_value`] / [`decode_value`] - the self-describing
//!   field values that make up request and reply tuples
//! - [`MsgPackCodec`] - serde-driven encoding of user types (`rmp-serde`)
//!
//! # Example
//!
//! ```
//! use iproto_client::codec::{decode_value, encode_value, MsgPackCodec, Value};
//!
//! let tuple = MsgPackCodec::to_tuple(&(1u64, "First record")).unwrap();
//!
//! let mut buf = Vec::new();
//! encode_value(&mut buf, &Value::Array(tuple.clone())).unwrap();
//! let (decoded, _) = decode_value(&buf).unwrap();
//! assert_eq!(decoded, Value::Array(tuple));
//! ```

mod msgpack;
mod value;

pub use msgpack::MsgPackCodec;
pub use value::{decode_value, encode_value, Value, MAX_DEPTH};

pub(crate) use value::{
    read_map_len, read_string, read_uint, read_value, write_array, write_array_len, write_map_len,
    write_str, write_uint, write_value,
};
