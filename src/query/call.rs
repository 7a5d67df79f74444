//! Stored-procedure calls and Lua evaluation.

use std::io::Write;

use serde::Serialize;

use super::Fields;
use crate::codec::{write_array, write_map_len, write_str, write_uint, MsgPackCodec, Value};
use crate::error::CodecResult;
use crate::protocol::key;

/// Call a stored function by name with positional arguments.
///
/// The reply rows are whatever tuples the function returns.
///
/// ```
/// use iproto_client::{Call, Value};
///
/// let call = Call::new("sel_name").arg(2u64).arg("Music");
/// assert_eq!(call.tuple, vec![Value::Unsigned(2), Value::from("Music")]);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Call {
    pub name: String,
    pub tuple: Vec<Value>,
}

impl Call {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tuple: Vec::new(),
        }
    }

    /// Replace the argument tuple.
    pub fn tuple(mut self, tuple: Vec<Value>) -> Self {
        self.tuple = tuple;
        self
    }

    /// Append one argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.tuple.push(value.into());
        self
    }

    /// Take the arguments from a serde tuple, struct or sequence.
    pub fn with_args<T: Serialize + ?Sized>(mut self, args: &T) -> CodecResult<Self> {
        self.tuple = MsgPackCodec::to_tuple(args)?;
        Ok(self)
    }

    pub(super) fn write_body<W: Write>(&self, wr: &mut W) -> CodecResult<()> {
        write_map_len(wr, 2)?;
        write_uint(wr, key::FUNCTION_NAME)?;
        write_str(wr, &self.name)?;
        write_uint(wr, key::TUPLE)?;
        write_array(wr, &self.tuple)
    }

    pub(super) fn from_fields(mut fields: Fields) -> CodecResult<Self> {
        Ok(Self {
            name: fields.string(key::FUNCTION_NAME)?,
            tuple: fields.array_or_empty(key::TUPLE)?,
        })
    }
}

/// Evaluate a Lua expression on the server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Eval {
    pub expr: String,
    pub tuple: Vec<Value>,
}

impl Eval {
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            tuple: Vec::new(),
        }
    }

    pub fn tuple(mut self, tuple: Vec<Value>) -> Self {
        self.tuple = tuple;
        self
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.tuple.push(value.into());
        self
    }

    pub(super) fn write_body<W: Write>(&self, wr: &mut W) -> CodecResult<()> {
        write_map_len(wr, 2)?;
        write_uint(wr, key::EXPR)?;
        write_str(wr, &self.expr)?;
        write_uint(wr, key::TUPLE)?;
        write_array(wr, &self.tuple)
    }

    pub(super) fn from_fields(mut fields: Fields) -> CodecResult<Self> {
        Ok(Self {
            expr: fields.string(key::EXPR)?,
            tuple: fields.array_or_empty(key::TUPLE)?,
        })
    }
}
