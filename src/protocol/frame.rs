//! Frame struct with typed accessors.
//!
//! Represents one complete packet: decoded header plus the raw body map.
//! Uses `bytes::Bytes` so the body shares the read buffer instead of copying.
//!
//! # Example
//!
//! ```
//! use iproto_client::protocol::{code, unpack_frame, Header, LENGTH_PREFIX_SIZE};
//! use bytes::BytesMut;
//!
//! let mut buf = BytesMut::new();
//! let start = iproto_client::protocol::begin_frame(&mut buf);
//! let mut wr = Vec::new();
//! Header::new(code::PING, 9).encode_into(&mut wr).unwrap();
//! buf.extend_from_slice(&wr);
//! buf.extend_from_slice(&[0x80]); // empty body map
//! iproto_client::protocol::finish_frame(&mut buf, start).unwrap();
//!
//! let (frame, used) = unpack_frame(&buf).unwrap();
//! assert_eq!(frame.sync(), 9);
//! assert_eq!(used, buf.len());
//! ```

use bytes::Bytes;

use super::wire_format::{decode_length, Header};
use crate::error::{CodecError, CodecResult};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Body map bytes (may be empty, e.g. for ping).
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame from header and body.
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Parse a packet (everything after the length prefix).
    pub fn parse(packet: Bytes) -> CodecResult<Self> {
        let (header, used) = Header::decode(&packet)?;
        Ok(Self {
            header,
            body: packet.slice(used..),
        })
    }

    /// Get a reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[inline]
    pub fn code(&self) -> u32 {
        self.header.code
    }

    #[inline]
    pub fn sync(&self) -> u64 {
        self.header.sync
    }

    /// Check if this is an error response.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.header.is_error()
    }
}

/// Unpack one frame from the front of `input`.
///
/// Returns the frame and the number of bytes consumed (prefix included).
/// If `input` holds fewer bytes than the prefix declares, this returns
/// [`CodecError::Incomplete`] ("read more"), never a malformed-frame error.
pub fn unpack_frame(input: &[u8]) -> CodecResult<(Frame, usize)> {
    let Some((prefix, length)) = decode_length(input)? else {
        return Err(CodecError::Incomplete {
            needed: 1.max(super::LENGTH_PREFIX_SIZE.saturating_sub(input.len())),
        });
    };

    let total = prefix + length as usize;
    if input.len() < total {
        return Err(CodecError::Incomplete {
            needed: total - input.len(),
        });
    }

    let frame = Frame::parse(Bytes::copy_from_slice(&input[prefix..total]))?;
    Ok((frame, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{begin_frame, code, finish_frame};
    use bytes::BytesMut;

    fn frame_bytes(header: Header, body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        let start = begin_frame(&mut buf);
        let mut wr = Vec::new();
        header.encode_into(&mut wr).unwrap();
        buf.extend_from_slice(&wr);
        buf.extend_from_slice(body);
        finish_frame(&mut buf, start).unwrap();
        buf
    }

    #[test]
    fn test_parse_splits_header_and_body() {
        let bytes = frame_bytes(Header::new(code::OK, 42), &[0x81, 0x30, 0x90]);
        let (frame, used) = unpack_frame(&bytes).unwrap();

        assert_eq!(used, bytes.len());
        assert_eq!(frame.code(), code::OK);
        assert_eq!(frame.sync(), 42);
        assert_eq!(frame.body(), &[0x81, 0x30, 0x90]);
        assert!(!frame.is_error());
    }

    #[test]
    fn test_empty_body() {
        let bytes = frame_bytes(Header::new(code::OK, 1), &[]);
        let (frame, _) = unpack_frame(&bytes).unwrap();
        assert!(frame.body().is_empty());
    }

    #[test]
    fn test_truncated_by_one_is_incomplete() {
        let bytes = frame_bytes(Header::new(code::OK, 42), &[0x81, 0x30, 0x90]);
        let err = unpack_frame(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err, CodecError::Incomplete { needed: 1 });
    }

    #[test]
    fn test_partial_prefix_is_incomplete() {
        let err = unpack_frame(&[0xce, 0x00]).unwrap_err();
        assert!(err.is_incomplete());
        let err = unpack_frame(&[]).unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = unpack_frame(&[0xa3, b'a', b'b', b'c']).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_bad_header_is_malformed() {
        // complete packet whose header is a string, not a map
        let mut buf = BytesMut::new();
        let start = begin_frame(&mut buf);
        buf.extend_from_slice(&[0xa1, b'x']);
        finish_frame(&mut buf, start).unwrap();

        let err = unpack_frame(&buf).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_consumes_only_first_frame() {
        let mut bytes = frame_bytes(Header::new(code::OK, 1), &[0x80]);
        let first_len = bytes.len();
        bytes.extend_from_slice(&frame_bytes(Header::new(code::OK, 2), &[0x80]));

        let (frame, used) = unpack_frame(&bytes).unwrap();
        assert_eq!(frame.sync(), 1);
        assert_eq!(used, first_len);

        let (frame, _) = unpack_frame(&bytes[used..]).unwrap();
        assert_eq!(frame.sync(), 2);
    }
}
