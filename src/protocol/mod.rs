//! Protocol module - wire format, framing, and request buffers.
//!
//! This module implements the IPROTO framing:
//! - Length prefix and header map encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors
//! - Pool of reusable request buffers

mod buffer_pool;
mod frame;
mod frame_buffer;
mod wire_format;

pub use buffer_pool::{
    BufferPool, PoolConfig, PoolStats, PooledBuffer, DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_IDLE,
    DEFAULT_MAX_RETAINED_CAPACITY,
};
pub use frame::{unpack_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    begin_frame, code, decode_length, finish_frame, key, Header, DEFAULT_MAX_BODY_SIZE,
    LENGTH_MARKER, LENGTH_PREFIX_SIZE,
};
