//! # iproto-client
//!
//! Async client for the Tarantool IPROTO binary protocol.
//!
//! One [`Connection`] carries many concurrent requests over a single
//! socket. Requests are correlated with replies by a per-connection
//! synchronization id, so callers may execute from as many tasks as they
//! like.
//!
//! ## Architecture
//!
//! - **Codec** ([`codec`]): self-describing MessagePack [`Value`]s, plus
//!   serde-driven typed encoding via `rmp-serde`
//! - **Protocol** ([`protocol`]): length-prefixed frames (header map + body
//!   map), incremental frame buffer, pooled request buffers
//! - **Queries** ([`query`]): call, eval, select, insert, replace, update,
//!   delete and ping requests, packed into and unpacked from frames
//! - **Connection** ([`connection`]): writer task, reader task, pending
//!   request table, deadlines and teardown
//!
//! ## Example
//!
//! ```no_run
//! use iproto_client::{Connection, Options, Value};
//!
//! #[tokio::main]
//! async fn main() -> iproto_client::Result<()> {
//!     let conn = Connection::connect("127.0.0.1:3301", Options::default()).await?;
//!
//!     let reply = conn
//!         .call("sel_name", vec![Value::from(2u64), Value::from("Music")])
//!         .await?;
//!     assert_eq!(reply.rows()[0][1].as_str(), Some("Music"));
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod greeting;
pub mod pending;
pub mod protocol;
pub mod query;
pub mod reply;
pub mod schema;
pub mod transport;
pub mod writer;

pub use codec::Value;
pub use connection::{Connection, ConnectionBuilder, Options};
pub use error::{CodecError, Error, ErrorKind, Result};
pub use query::{Call, Delete, Eval, Insert, IteratorType, Query, Replace, Select, Update};
pub use reply::{Reply, Row};
pub use schema::{PackContext, SchemaLookup, StaticSchema, Target};
