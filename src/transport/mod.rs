//! Transport module - socket connect.
//!
//! Provides abstraction over:
//! - TCP (`host:port`, `tcp://host:port`)
//! - Unix Domain Sockets (`unix:/path`, Unix only)

mod stream;

pub use stream::{connect, Address, AsyncStream, BoxedStream};
