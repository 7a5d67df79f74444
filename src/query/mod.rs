//! Requests and their wire encoding.
//!
//! A [`Query`] is packed into a complete frame (length prefix, header map,
//! body map) by [`Query::pack`], and recovered from one by
//! [`Query::unpack`] / [`Query::from_frame`]. Space and index names are
//! resolved through the [`PackContext`] while packing, so an unpacked keyed
//! query always carries numeric ids.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use iproto_client::query::{Call, Query};
//! use iproto_client::schema::PackContext;
//!
//! let query = Query::from(Call::new("sel_name").arg(2u64).arg("Music"));
//!
//! let mut buf = BytesMut::new();
//! query.pack(7, &PackContext::default(), &mut buf).unwrap();
//!
//! assert_eq!(Query::unpack(&buf).unwrap(), query);
//! ```

mod call;
mod modify;
mod select;

pub use call::{Call, Eval};
pub use modify::{Delete, Insert, Operator, Replace, Update, UpdateOp};
pub use select::{IteratorType, Select};

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

use crate::codec::{read_map_len, read_uint, read_value, write_map_len, Value};
use crate::error::{CodecError, CodecResult};
use crate::protocol::{begin_frame, code, finish_frame, unpack_frame, Frame, Header};
use crate::schema::PackContext;

/// A request the client can send.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Call(Call),
    Eval(Eval),
    Select(Select),
    Insert(Insert),
    Replace(Replace),
    Update(Update),
    Delete(Delete),
    Ping,
}

impl Query {
    /// Request type code written into the header.
    pub fn code(&self) -> u32 {
        match self {
            Query::Call(_) => code::CALL_16,
            Query::Eval(_) => code::EVAL,
            Query::Select(_) => code::SELECT,
            Query::Insert(_) => code::INSERT,
            Query::Replace(_) => code::REPLACE,
            Query::Update(_) => code::UPDATE,
            Query::Delete(_) => code::DELETE,
            Query::Ping => code::PING,
        }
    }

    /// Append the complete frame for this query to `buf`.
    ///
    /// On error nothing is left behind in `buf`.
    pub fn pack(&self, sync: u64, ctx: &PackContext, buf: &mut BytesMut) -> CodecResult<()> {
        let start = begin_frame(buf);
        let written = self
            .write_packet(sync, ctx, buf)
            .and_then(|()| finish_frame(buf, start));

        match written {
            Ok(_) => Ok(()),
            Err(err) => {
                buf.truncate(start);
                Err(err)
            }
        }
    }

    fn write_packet(&self, sync: u64, ctx: &PackContext, buf: &mut BytesMut) -> CodecResult<()> {
        let mut wr = (&mut *buf).writer();
        Header::new(self.code(), sync).encode_into(&mut wr)?;

        match self {
            Query::Call(q) => q.write_body(&mut wr),
            Query::Eval(q) => q.write_body(&mut wr),
            Query::Select(q) => q.write_body(ctx, &mut wr),
            Query::Insert(q) => q.write_body(ctx, &mut wr),
            Query::Replace(q) => q.write_body(ctx, &mut wr),
            Query::Update(q) => q.write_body(ctx, &mut wr),
            Query::Delete(q) => q.write_body(ctx, &mut wr),
            Query::Ping => write_map_len(&mut wr, 0),
        }
    }

    /// Decode a query from one complete frame (length prefix included).
    pub fn unpack(input: &[u8]) -> CodecResult<Self> {
        let (frame, _) = unpack_frame(input)?;
        Self::from_frame(&frame)
    }

    /// Decode a query from an already split frame.
    pub fn from_frame(frame: &Frame) -> CodecResult<Self> {
        let fields = Fields::parse(frame.body())?;

        Ok(match frame.code() {
            code::CALL_16 | code::CALL => Query::Call(Call::from_fields(fields)?),
            code::EVAL => Query::Eval(Eval::from_fields(fields)?),
            code::SELECT => Query::Select(Select::from_fields(fields)?),
            code::INSERT => Query::Insert(Insert::from_fields(fields)?),
            code::REPLACE => Query::Replace(Replace::from_fields(fields)?),
            code::UPDATE => Query::Update(Update::from_fields(fields)?),
            code::DELETE => Query::Delete(Delete::from_fields(fields)?),
            code::PING => Query::Ping,
            other => {
                return Err(CodecError::malformed(format!(
                    "unknown request code {:#x}",
                    other
                )))
            }
        })
    }
}

macro_rules! impl_from_request {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Query {
                fn from(q: $variant) -> Self {
                    Query::$variant(q)
                }
            }
        )*
    };
}

impl_from_request!(Call, Eval, Select, Insert, Replace, Update, Delete);

/// Body map of a request, keyed by IPROTO body key.
pub(crate) struct Fields {
    entries: HashMap<u64, Value>,
}

impl Fields {
    /// Parse a body map. An empty body has no fields.
    pub(crate) fn parse(body: &[u8]) -> CodecResult<Self> {
        let mut entries = HashMap::new();
        if body.is_empty() {
            return Ok(Self { entries });
        }

        let mut rd = body;
        let count = read_map_len(&mut rd)?;
        for _ in 0..count {
            let key = read_uint(&mut rd)?;
            let value = read_value(&mut rd)?;
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }

    pub(crate) fn take(&mut self, key: u64) -> Option<Value> {
        self.entries.remove(&key)
    }

    fn missing(key: u64) -> CodecError {
        CodecError::malformed(format!("missing body field {:#04x}", key))
    }

    fn wrong_type(key: u64, expected: &str, found: &Value) -> CodecError {
        CodecError::malformed(format!(
            "body field {:#04x}: expected {}, found {:?}",
            key, expected, found
        ))
    }

    pub(crate) fn string(&mut self, key: u64) -> CodecResult<String> {
        match self.take(key) {
            Some(Value::Text(s)) => Ok(s),
            Some(other) => Err(Self::wrong_type(key, "string", &other)),
            None => Err(Self::missing(key)),
        }
    }

    pub(crate) fn array_or_empty(&mut self, key: u64) -> CodecResult<Vec<Value>> {
        match self.take(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(Self::wrong_type(key, "array", &other)),
            None => Ok(Vec::new()),
        }
    }

    pub(crate) fn uint_or(&mut self, key: u64, default: u64) -> CodecResult<u64> {
        match self.take(key) {
            Some(Value::Unsigned(n)) => Ok(n),
            Some(other) => Err(Self::wrong_type(key, "unsigned integer", &other)),
            None => Ok(default),
        }
    }

    pub(crate) fn u32_or(&mut self, key: u64, default: u32) -> CodecResult<u32> {
        let n = self.uint_or(key, default.into())?;
        u32::try_from(n).map_err(|_| {
            CodecError::malformed(format!("body field {:#04x}: {} overflows u32", key, n))
        })
    }

    pub(crate) fn u32(&mut self, key: u64) -> CodecResult<u32> {
        if !self.entries.contains_key(&key) {
            return Err(Self::missing(key));
        }
        self.u32_or(key, 0)
    }
}
