//! Wire format encoding and decoding.
//!
//! Every IPROTO packet, in both directions, looks like:
//! ```text
//! ┌──────────────┬──────────────────────────┬──────────────────────┐
//! │ Length       │ Header map               │ Body map             │
//! │ 0xce + u32 BE│ {0x00: code, 0x01: sync} │ {key: value, ...}    │
//! │ 5 bytes      │ MsgPack                  │ MsgPack              │
//! └──────────────┴──────────────────────────┴──────────────────────┘
//! ```
//!
//! The length counts every byte after the prefix (header map + body map).

use std::io::Write;

use bytes::BytesMut;

use crate::codec::{read_map_len, read_uint, read_value, write_map_len, write_uint};
use crate::error::{CodecError, CodecResult};

/// Size of the length prefix we write (MsgPack uint32).
pub const LENGTH_PREFIX_SIZE: usize = 5;

/// MsgPack uint32 marker used for the length prefix.
pub const LENGTH_MARKER: u8 = 0xce;

/// Default maximum packet size accepted from the server (64 MB).
pub const DEFAULT_MAX_BODY_SIZE: u32 = 64 * 1024 * 1024;

/// Request and response type codes (header key `0x00`).
pub mod code {
    pub const OK: u32 = 0x00;
    pub const SELECT: u32 = 0x01;
    pub const INSERT: u32 = 0x02;
    pub const REPLACE: u32 = 0x03;
    pub const UPDATE: u32 = 0x04;
    pub const DELETE: u32 = 0x05;
    /// Call returning tuples (1.6 semantics).
    pub const CALL_16: u32 = 0x06;
    pub const EVAL: u32 = 0x08;
    /// Call returning a multi-return list (1.7+ semantics).
    pub const CALL: u32 = 0x0a;
    pub const PING: u32 = 0x40;

    /// Set on every error response; the low bits carry the server errcode.
    pub const ERROR_FLAG: u32 = 0x8000;
}

/// Map keys used in headers and bodies.
pub mod key {
    pub const CODE: u64 = 0x00;
    pub const SYNC: u64 = 0x01;
    pub const SCHEMA_VERSION: u64 = 0x05;

    pub const SPACE_ID: u64 = 0x10;
    pub const INDEX_ID: u64 = 0x11;
    pub const LIMIT: u64 = 0x12;
    pub const OFFSET: u64 = 0x13;
    pub const ITERATOR: u64 = 0x14;

    pub const KEY: u64 = 0x20;
    pub const TUPLE: u64 = 0x21;
    pub const FUNCTION_NAME: u64 = 0x22;
    pub const EXPR: u64 = 0x27;

    pub const DATA: u64 = 0x30;
    pub const ERROR: u64 = 0x31;
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Request type, or response status (`0` ok, `0x8000 | errcode` error).
    pub code: u32,
    /// Synchronization id correlating a response with its request.
    pub sync: u64,
    /// Schema version the server answered with, if present.
    pub schema_version: Option<u64>,
}

impl Header {
    /// Create a new header.
    pub fn new(code: u32, sync: u64) -> Self {
        Self {
            code,
            sync,
            schema_version: None,
        }
    }

    /// Attach a schema version.
    pub fn with_schema_version(mut self, version: u64) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Encode the header map.
    pub fn encode_into<W: Write>(&self, wr: &mut W) -> CodecResult<()> {
        let entries = if self.schema_version.is_some() { 3 } else { 2 };
        write_map_len(wr, entries)?;
        write_uint(wr, key::CODE)?;
        write_uint(wr, self.code.into())?;
        write_uint(wr, key::SYNC)?;
        write_uint(wr, self.sync)?;
        if let Some(version) = self.schema_version {
            write_uint(wr, key::SCHEMA_VERSION)?;
            write_uint(wr, version)?;
        }
        Ok(())
    }

    /// Decode a header map from the front of `input`.
    ///
    /// Returns the header and the number of bytes it occupied. Unknown keys
    /// are skipped.
    pub fn decode(input: &[u8]) -> CodecResult<(Self, usize)> {
        let mut rd = input;
        let header = Self::read(&mut rd)?;
        Ok((header, input.len() - rd.len()))
    }

    pub(crate) fn read(rd: &mut &[u8]) -> CodecResult<Self> {
        let entries = read_map_len(rd)?;
        let mut code = None;
        let mut sync = 0;
        let mut schema_version = None;

        for _ in 0..entries {
            match read_uint(rd)? {
                key::CODE => {
                    let raw = read_uint(rd)?;
                    code = Some(u32::try_from(raw).map_err(|_| {
                        CodecError::malformed(format!("response code {} overflows u32", raw))
                    })?);
                }
                key::SYNC => sync = read_uint(rd)?,
                key::SCHEMA_VERSION => schema_version = Some(read_uint(rd)?),
                _ => {
                    read_value(rd)?;
                }
            }
        }

        let code = code.ok_or_else(|| CodecError::malformed("header without code"))?;
        Ok(Self {
            code,
            sync,
            schema_version,
        })
    }

    /// Check if this is an error response.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.code & code::ERROR_FLAG != 0
    }

    /// Server error code of an error response.
    #[inline]
    pub fn error_code(&self) -> u32 {
        self.code & !code::ERROR_FLAG
    }
}

/// Decode the length prefix at the front of `input`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the prefix size
/// and the declared packet length. Any MsgPack unsigned integer up to 32 bits
/// is accepted; servers always send the 5-byte uint32 form.
pub fn decode_length(input: &[u8]) -> CodecResult<Option<(usize, u32)>> {
    let Some(&marker) = input.first() else {
        return Ok(None);
    };

    let prefix = match marker {
        0x00..=0x7f => return Ok(Some((1, marker.into()))),
        0xcc => 2,
        0xcd => 3,
        LENGTH_MARKER => LENGTH_PREFIX_SIZE,
        other => {
            return Err(CodecError::malformed(format!(
                "invalid length prefix marker {:#04x}",
                other
            )))
        }
    };

    if input.len() < prefix {
        return Ok(None);
    }

    let length: u32 = match prefix {
        2 => input[1].into(),
        3 => u16::from_be_bytes([input[1], input[2]]).into(),
        _ => u32::from_be_bytes([input[1], input[2], input[3], input[4]]),
    };
    Ok(Some((prefix, length)))
}

/// Reserve the length prefix at the end of `buf`.
///
/// Returns the offset of the placeholder, to be passed to [`finish_frame`].
pub fn begin_frame(buf: &mut BytesMut) -> usize {
    let start = buf.len();
    buf.extend_from_slice(&[LENGTH_MARKER, 0, 0, 0, 0]);
    start
}

/// Back-patch the length prefix written by [`begin_frame`].
///
/// Returns the packet length written into the prefix.
pub fn finish_frame(buf: &mut BytesMut, start: usize) -> CodecResult<u32> {
    let body_start = start + LENGTH_PREFIX_SIZE;
    let length = u32::try_from(buf.len() - body_start)
        .map_err(|_| CodecError::Encode(format!("packet of {} bytes", buf.len() - body_start)))?;
    buf[start + 1..body_start].copy_from_slice(&length.to_be_bytes());
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(header: &Header) -> Vec<u8> {
        let mut buf = Vec::new();
        header.encode_into(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(code::CALL_16, 42);
        let bytes = encoded(&original);
        let (decoded, used) = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_header_layout() {
        let bytes = encoded(&Header::new(code::PING, 7));
        // {0x00: 0x40, 0x01: 7}
        assert_eq!(bytes, [0x82, 0x00, 0x40, 0x01, 0x07]);
    }

    #[test]
    fn test_header_with_schema_version() {
        let original = Header::new(code::OK, u64::MAX).with_schema_version(80);
        let (decoded, _) = Header::decode(&encoded(&original)).unwrap();
        assert_eq!(decoded.schema_version, Some(80));
        assert_eq!(decoded.sync, u64::MAX);
    }

    #[test]
    fn test_header_skips_unknown_keys() {
        // {0x00: 0, 0x01: 3, 0x99: "x"}
        let bytes = [0x83, 0x00, 0x00, 0x01, 0x03, 0xcc, 0x99, 0xa1, b'x'];
        let (decoded, used) = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, Header::new(code::OK, 3));
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_header_without_code_rejected() {
        let bytes = [0x81, 0x01, 0x03];
        let err = Header::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("without code"));
    }

    #[test]
    fn test_error_flag() {
        let header = Header::new(code::ERROR_FLAG | 0x21, 1);
        assert!(header.is_error());
        assert_eq!(header.error_code(), 0x21);
        assert!(!Header::new(code::OK, 1).is_error());
    }

    #[test]
    fn test_decode_length_forms() {
        assert_eq!(decode_length(&[]).unwrap(), None);
        assert_eq!(decode_length(&[0x05]).unwrap(), Some((1, 5)));
        assert_eq!(decode_length(&[0xcc, 0xff]).unwrap(), Some((2, 255)));
        assert_eq!(decode_length(&[0xcd, 0x01, 0x00]).unwrap(), Some((3, 256)));
        assert_eq!(
            decode_length(&[0xce, 0x00, 0x01, 0x00, 0x00]).unwrap(),
            Some((5, 65536))
        );
        assert_eq!(decode_length(&[0xce, 0x00, 0x01]).unwrap(), None);
    }

    #[test]
    fn test_decode_length_rejects_non_uint() {
        assert!(decode_length(&[0xa1, b'x']).is_err());
        assert!(decode_length(&[0xcf, 0, 0, 0, 0, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn test_begin_finish_frame_backpatches_length() {
        let mut buf = BytesMut::new();
        let start = begin_frame(&mut buf);
        buf.extend_from_slice(b"0123456789");
        let length = finish_frame(&mut buf, start).unwrap();

        assert_eq!(length, 10);
        assert_eq!(&buf[..LENGTH_PREFIX_SIZE], &[0xce, 0, 0, 0, 10]);
        assert_eq!(decode_length(&buf).unwrap(), Some((5, 10)));
    }

    #[test]
    fn test_begin_frame_after_existing_bytes() {
        let mut buf = BytesMut::from(&b"junk"[..]);
        let start = begin_frame(&mut buf);
        buf.extend_from_slice(b"abc");
        finish_frame(&mut buf, start).unwrap();
        assert_eq!(&buf[4..9], &[0xce, 0, 0, 0, 3]);
    }
}
