//! Self-describing field values and their MessagePack encoding.
//!
//! Every tuple field travelling over the wire is a [`Value`]. The encoding is
//! plain MessagePack, so the type of each value is recovered from its marker
//! byte without any schema:
//!
//! ```
//! use iproto_client::codec::{decode_value, encode_value, Value};
//!
//! let mut buf = Vec::new();
//! encode_value(&mut buf, &Value::from(93u64)).unwrap();
//! assert_eq!(buf, [0x5d]); // positive fixint
//!
//! let (value, used) = decode_value(&buf).unwrap();
//! assert_eq!(value, Value::Unsigned(93));
//! assert_eq!(used, 1);
//! ```
//!
//! Integers are written in their most compact form. Non-negative integers
//! always decode as [`Value::Unsigned`], whatever marker carried them; only
//! negative integers decode as [`Value::Signed`].

use std::io::Write;

use bytes::{Buf, BufMut};
use rmp::Marker;

use crate::error::{CodecError, CodecResult};

/// Maximum nesting of arrays/maps accepted by the decoder.
pub const MAX_DEPTH: usize = 128;

/// A single decoded field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    /// Any non-negative integer.
    Unsigned(u64),
    /// Negative integers.
    ///
    /// A non-negative payload is written in unsigned form and decodes back
    /// as [`Value::Unsigned`]; use `Value::from(i64)` to get that form up
    /// front.
    Signed(i64),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    /// Map entries in wire order.
    Map(Vec<(Value, Value)>),
    /// MessagePack extension (decimal, uuid, datetime...), kept opaque.
    Ext { tag: i8, data: Vec<u8> },
}

impl Value {
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Unsigned integer content, if any.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Unsigned(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer content that fits an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Unsigned(n) => i64::try_from(*n).ok(),
            Value::Signed(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Unsigned(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Unsigned(n.into())
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Value::Unsigned(n.into())
    }
}

impl From<u8> for Value {
    fn from(n: u8) -> Self {
        Value::Unsigned(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        if n >= 0 {
            Value::Unsigned(n as u64)
        } else {
            Value::Signed(n)
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::from(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Nil, Into::into)
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Append the MessagePack encoding of `value` to `buf`.
pub fn encode_value<B: BufMut>(buf: &mut B, value: &Value) -> CodecResult<()> {
    let mut wr = buf.writer();
    write_value(&mut wr, value)
}

fn encode_err<E: std::fmt::Display>(err: E) -> CodecError {
    CodecError::Encode(err.to_string())
}

fn len_u32(len: usize) -> CodecResult<u32> {
    u32::try_from(len).map_err(|_| CodecError::Encode(format!("length {} overflows u32", len)))
}

pub(crate) fn write_value<W: Write>(wr: &mut W, value: &Value) -> CodecResult<()> {
    match value {
        Value::Nil => rmp::encode::write_nil(wr).map_err(encode_err),
        Value::Bool(b) => rmp::encode::write_bool(wr, *b).map_err(encode_err),
        Value::Unsigned(n) => write_uint(wr, *n),
        Value::Signed(n) if *n >= 0 => write_uint(wr, n.unsigned_abs()),
        Value::Signed(n) => rmp::encode::write_sint(wr, *n)
            .map(|_| ())
            .map_err(encode_err),
        Value::Float(f) => rmp::encode::write_f64(wr, *f).map_err(encode_err),
        Value::Text(s) => write_str(wr, s),
        Value::Binary(data) => rmp::encode::write_bin(wr, data).map_err(encode_err),
        Value::Array(items) => write_array(wr, items),
        Value::Map(entries) => {
            write_map_len(wr, entries.len())?;
            for (key, val) in entries {
                write_value(wr, key)?;
                write_value(wr, val)?;
            }
            Ok(())
        }
        Value::Ext { tag, data } => {
            rmp::encode::write_ext_meta(wr, len_u32(data.len())?, *tag).map_err(encode_err)?;
            wr.write_all(data).map_err(encode_err)
        }
    }
}

/// Write `items` as a MessagePack array.
pub(crate) fn write_array<W: Write>(wr: &mut W, items: &[Value]) -> CodecResult<()> {
    write_array_len(wr, items.len())?;
    for item in items {
        write_value(wr, item)?;
    }
    Ok(())
}

pub(crate) fn write_array_len<W: Write>(wr: &mut W, len: usize) -> CodecResult<()> {
    rmp::encode::write_array_len(wr, len_u32(len)?)
        .map(|_| ())
        .map_err(encode_err)
}

pub(crate) fn write_uint<W: Write>(wr: &mut W, n: u64) -> CodecResult<()> {
    rmp::encode::write_uint(wr, n)
        .map(|_| ())
        .map_err(encode_err)
}

pub(crate) fn write_str<W: Write>(wr: &mut W, s: &str) -> CodecResult<()> {
    rmp::encode::write_str(wr, s).map_err(encode_err)
}

pub(crate) fn write_map_len<W: Write>(wr: &mut W, len: usize) -> CodecResult<()> {
    rmp::encode::write_map_len(wr, len_u32(len)?)
        .map(|_| ())
        .map_err(encode_err)
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode one value from the front of `input`.
///
/// Returns the value and the number of bytes it occupied. Running out of
/// input before the value is complete is a [`CodecError::Malformed`] error:
/// callers hand this function whole frame bodies, so a short value means a
/// corrupt body, not a partial read.
pub fn decode_value(input: &[u8]) -> CodecResult<(Value, usize)> {
    let mut rd = input;
    let value = read_value(&mut rd)?;
    Ok((value, input.len() - rd.len()))
}

/// Decode one value, advancing `rd` past it.
pub(crate) fn read_value(rd: &mut &[u8]) -> CodecResult<Value> {
    read_nested(rd, 0)
}

fn need(rd: &[u8], n: usize) -> CodecResult<()> {
    if rd.len() < n {
        return Err(CodecError::malformed(format!(
            "unexpected end of input: need {} bytes, have {}",
            n,
            rd.len()
        )));
    }
    Ok(())
}

fn take<'a>(rd: &mut &'a [u8], n: usize) -> CodecResult<&'a [u8]> {
    need(rd, n)?;
    let input: &'a [u8] = *rd;
    let (head, tail) = input.split_at(n);
    *rd = tail;
    Ok(head)
}

fn read_marker(rd: &mut &[u8]) -> CodecResult<Marker> {
    need(rd, 1)?;
    Ok(Marker::from_u8(rd.get_u8()))
}

fn read_len(rd: &mut &[u8], width: usize) -> CodecResult<usize> {
    need(rd, width)?;
    Ok(match width {
        1 => rd.get_u8() as usize,
        2 => rd.get_u16() as usize,
        _ => rd.get_u32() as usize,
    })
}

fn signed(n: i64) -> Value {
    Value::from(n)
}

fn read_text(rd: &mut &[u8], len: usize) -> CodecResult<Value> {
    let raw = take(rd, len)?;
    let text = std::str::from_utf8(raw)
        .map_err(|e| CodecError::malformed(format!("invalid utf-8 in string: {}", e)))?;
    Ok(Value::Text(text.to_string()))
}

fn read_items(rd: &mut &[u8], count: usize, depth: usize) -> CodecResult<Value> {
    // every element takes at least one byte
    need(rd, count)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read_nested(rd, depth + 1)?);
    }
    Ok(Value::Array(items))
}

fn read_entries(rd: &mut &[u8], count: usize, depth: usize) -> CodecResult<Value> {
    need(rd, count.saturating_mul(2))?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let key = read_nested(rd, depth + 1)?;
        let val = read_nested(rd, depth + 1)?;
        entries.push((key, val));
    }
    Ok(Value::Map(entries))
}

fn read_ext(rd: &mut &[u8], len: usize) -> CodecResult<Value> {
    need(rd, 1)?;
    let tag = rd.get_i8();
    let data = take(rd, len)?.to_vec();
    Ok(Value::Ext { tag, data })
}

fn read_nested(rd: &mut &[u8], depth: usize) -> CodecResult<Value> {
    if depth > MAX_DEPTH {
        return Err(CodecError::malformed(format!(
            "nesting deeper than {} levels",
            MAX_DEPTH
        )));
    }

    let marker = read_marker(rd)?;
    match marker {
        Marker::Null => Ok(Value::Nil),
        Marker::True => Ok(Value::Bool(true)),
        Marker::False => Ok(Value::Bool(false)),

        Marker::FixPos(n) => Ok(Value::Unsigned(n.into())),
        Marker::FixNeg(n) => Ok(Value::Signed(n.into())),
        Marker::U8 => {
            need(rd, 1)?;
            Ok(Value::Unsigned(rd.get_u8().into()))
        }
        Marker::U16 => {
            need(rd, 2)?;
            Ok(Value::Unsigned(rd.get_u16().into()))
        }
        Marker::U32 => {
            need(rd, 4)?;
            Ok(Value::Unsigned(rd.get_u32().into()))
        }
        Marker::U64 => {
            need(rd, 8)?;
            Ok(Value::Unsigned(rd.get_u64()))
        }
        Marker::I8 => {
            need(rd, 1)?;
            Ok(signed(rd.get_i8().into()))
        }
        Marker::I16 => {
            need(rd, 2)?;
            Ok(signed(rd.get_i16().into()))
        }
        Marker::I32 => {
            need(rd, 4)?;
            Ok(signed(rd.get_i32().into()))
        }
        Marker::I64 => {
            need(rd, 8)?;
            Ok(signed(rd.get_i64()))
        }

        Marker::F32 => {
            need(rd, 4)?;
            Ok(Value::Float(rd.get_f32().into()))
        }
        Marker::F64 => {
            need(rd, 8)?;
            Ok(Value::Float(rd.get_f64()))
        }

        Marker::FixStr(n) => read_text(rd, n.into()),
        Marker::Str8 => {
            let len = read_len(rd, 1)?;
            read_text(rd, len)
        }
        Marker::Str16 => {
            let len = read_len(rd, 2)?;
            read_text(rd, len)
        }
        Marker::Str32 => {
            let len = read_len(rd, 4)?;
            read_text(rd, len)
        }

        Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
            let width = match marker {
                Marker::Bin8 => 1,
                Marker::Bin16 => 2,
                _ => 4,
            };
            let len = read_len(rd, width)?;
            Ok(Value::Binary(take(rd, len)?.to_vec()))
        }

        Marker::FixArray(n) => read_items(rd, n.into(), depth),
        Marker::Array16 => {
            let count = read_len(rd, 2)?;
            read_items(rd, count, depth)
        }
        Marker::Array32 => {
            let count = read_len(rd, 4)?;
            read_items(rd, count, depth)
        }

        Marker::FixMap(n) => read_entries(rd, n.into(), depth),
        Marker::Map16 => {
            let count = read_len(rd, 2)?;
            read_entries(rd, count, depth)
        }
        Marker::Map32 => {
            let count = read_len(rd, 4)?;
            read_entries(rd, count, depth)
        }

        Marker::FixExt1 => read_ext(rd, 1),
        Marker::FixExt2 => read_ext(rd, 2),
        Marker::FixExt4 => read_ext(rd, 4),
        Marker::FixExt8 => read_ext(rd, 8),
        Marker::FixExt16 => read_ext(rd, 16),
        Marker::Ext8 => {
            let len = read_len(rd, 1)?;
            read_ext(rd, len)
        }
        Marker::Ext16 => {
            let len = read_len(rd, 2)?;
            read_ext(rd, len)
        }
        Marker::Ext32 => {
            let len = read_len(rd, 4)?;
            read_ext(rd, len)
        }

        Marker::Reserved => Err(CodecError::malformed("reserved marker 0xc1")),
    }
}

/// Read a map header, returning the entry count.
pub(crate) fn read_map_len(rd: &mut &[u8]) -> CodecResult<usize> {
    match read_marker(rd)? {
        Marker::FixMap(n) => Ok(n.into()),
        Marker::Map16 => read_len(rd, 2),
        Marker::Map32 => read_len(rd, 4),
        other => Err(CodecError::malformed(format!(
            "expected map, found {:?}",
            other
        ))),
    }
}

/// Read an unsigned integer (any width).
pub(crate) fn read_uint(rd: &mut &[u8]) -> CodecResult<u64> {
    match read_value(rd)? {
        Value::Unsigned(n) => Ok(n),
        other => Err(CodecError::malformed(format!(
            "expected unsigned integer, found {:?}",
            other
        ))),
    }
}

pub(crate) fn read_string(rd: &mut &[u8]) -> CodecResult<String> {
    match read_value(rd)? {
        Value::Text(s) => Ok(s),
        other => Err(CodecError::malformed(format!(
            "expected string, found {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_value(&mut buf, value).unwrap();
        buf
    }

    #[test]
    fn test_unsigned_93_decodes_as_unsigned() {
        let bytes = encode(&Value::Unsigned(93));
        assert_eq!(bytes, [0x5d]);

        let (value, used) = decode_value(&bytes).unwrap();
        assert_eq!(value, Value::Unsigned(93));
        assert_eq!(value.as_u64(), Some(93));
        assert_eq!(used, 1);
    }

    #[test]
    fn test_integers_use_compact_forms() {
        assert_eq!(encode(&Value::Unsigned(300)), [0xcd, 0x01, 0x2c]);
        assert_eq!(encode(&Value::Unsigned(u64::MAX))[0], 0xcf);
        assert_eq!(encode(&Value::Signed(-1)), [0xff]);
        assert_eq!(encode(&Value::Signed(-200)), [0xd1, 0xff, 0x38]);
    }

    #[test]
    fn test_signed_marker_with_positive_value_normalizes() {
        // int8 marker carrying 5
        let (value, _) = decode_value(&[0xd0, 0x05]).unwrap();
        assert_eq!(value, Value::Unsigned(5));

        let (value, _) = decode_value(&[0xd0, 0xfb]).unwrap();
        assert_eq!(value, Value::Signed(-5));
    }

    #[test]
    fn test_non_negative_signed_encodes_unsigned() {
        assert_eq!(encode(&Value::Signed(5)), [0x05]);
        assert_eq!(encode(&Value::Signed(300)), encode(&Value::Unsigned(300)));

        let (value, _) = decode_value(&encode(&Value::Signed(5))).unwrap();
        assert_eq!(value, Value::Unsigned(5));
    }

    #[test]
    fn test_from_i64_splits_on_sign() {
        assert_eq!(Value::from(7i64), Value::Unsigned(7));
        assert_eq!(Value::from(-7i32), Value::Signed(-7));
    }

    #[test]
    fn test_text_and_nested() {
        let value = Value::Array(vec![
            Value::Unsigned(3),
            Value::from("Length"),
            Value::Array(vec![Value::Nil, Value::Float(1.5), Value::Bool(true)]),
        ]);
        let bytes = encode(&value);
        assert_eq!(bytes[0], 0x93);

        let (decoded, used) = decode_value(&bytes).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_nil_marker() {
        assert_eq!(encode(&Value::Nil), [0xc0]);
        assert_eq!(Value::from(None::<u64>), Value::Nil);
    }

    #[test]
    fn test_float32_widens() {
        let (value, _) = decode_value(&[0xca, 0x3f, 0xc0, 0x00, 0x00]).unwrap();
        assert_eq!(value, Value::Float(1.5));
    }

    #[test]
    fn test_map_and_ext() {
        let value = Value::Map(vec![(Value::from("k"), Value::Unsigned(1))]);
        let (decoded, _) = decode_value(&encode(&value)).unwrap();
        assert_eq!(decoded, value);

        let ext = Value::Ext {
            tag: 1,
            data: vec![0x01, 0x02, 0x0c],
        };
        let (decoded, _) = decode_value(&encode(&ext)).unwrap();
        assert_eq!(decoded, ext);
    }

    #[test]
    fn test_truncated_value_is_malformed() {
        let bytes = encode(&Value::from("First record"));
        let err = decode_value(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
        assert!(!err.is_incomplete());
    }

    #[test]
    fn test_array_count_larger_than_input() {
        // array32 claiming 1M elements, no payload
        let err = decode_value(&[0xdd, 0x00, 0x0f, 0x42, 0x40]).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_depth_limit() {
        let mut bytes = vec![0x91; MAX_DEPTH + 2];
        bytes.push(0xc0);
        let err = decode_value(&bytes).unwrap_err();
        assert!(err.to_string().contains("nesting"));
    }

    #[test]
    fn test_reserved_marker_rejected() {
        assert!(decode_value(&[0xc1]).is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        assert!(decode_value(&[0xa2, 0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_decode_reports_consumed_prefix_only() {
        let mut bytes = encode(&Value::Unsigned(1));
        bytes.extend(encode(&Value::from("tail")));
        let (value, used) = decode_value(&bytes).unwrap();
        assert_eq!(value, Value::Unsigned(1));
        assert_eq!(used, 1);
    }
}
