//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForLength`: Need the complete length prefix
//! - `WaitingForPacket`: Prefix parsed, need N more packet bytes
//!
//! # Example
//!
//! ```ignore
//! use iproto_client::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from socket
//! let frames = buffer.push(&chunk)?;
//!
//! for frame in frames {
//!     println!("reply for sync {}", frame.sync());
//! }
//! ```

use bytes::BytesMut;

use super::wire_format::{decode_length, DEFAULT_MAX_BODY_SIZE};
use super::Frame;
use crate::error::{CodecError, CodecResult};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete length prefix.
    WaitingForLength,
    /// Prefix consumed, waiting for `remaining` packet bytes.
    WaitingForPacket { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// A packet is never interpreted before all of its declared bytes are
/// buffered.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed packet size.
    max_body_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max packet: 64MB.
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_SIZE)
    }

    /// Create a new frame buffer with custom max packet size.
    pub fn with_max_body(max_body_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_body_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns an error if a packet exceeds the maximum size or cannot be
    /// parsed. The stream is unusable afterwards.
    pub fn push(&mut self, data: &[u8]) -> CodecResult<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation
    fn try_extract_one(&mut self) -> CodecResult<Option<Frame>> {
        match self.state {
            State::WaitingForLength => {
                let Some((prefix, length)) = decode_length(&self.buffer)? else {
                    return Ok(None);
                };

                if length > self.max_body_size {
                    return Err(CodecError::BodyTooLarge {
                        size: length,
                        max: self.max_body_size,
                    });
                }

                let _ = self.buffer.split_to(prefix);
                self.state = State::WaitingForPacket { remaining: length };
                self.try_extract_one()
            }

            State::WaitingForPacket { remaining } => {
                let remaining = remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let packet = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForLength;
                Frame::parse(packet).map(Some)
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForPacket { .. } => "WaitingForPacket",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
