//! Data-modifying requests: insert, replace, update, delete.

use std::io::Write;

use super::Fields;
use crate::codec::{
    write_array, write_array_len, write_map_len, write_str, write_uint, write_value, Value,
};
use crate::error::{CodecError, CodecResult};
use crate::protocol::key;
use crate::schema::{PackContext, Target};

/// Insert a tuple; fails on the server if the primary key exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub space: Target,
    pub tuple: Vec<Value>,
}

/// Insert a tuple, overwriting any tuple with the same primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct Replace {
    pub space: Target,
    pub tuple: Vec<Value>,
}

macro_rules! tuple_request {
    ($name:ident) => {
        impl $name {
            pub fn new(space: impl Into<Target>, tuple: Vec<Value>) -> Self {
                Self {
                    space: space.into(),
                    tuple,
                }
            }

            pub(super) fn write_body<W: Write>(
                &self,
                ctx: &PackContext,
                wr: &mut W,
            ) -> CodecResult<()> {
                let space = ctx.space_id(&self.space)?;
                write_map_len(wr, 2)?;
                write_uint(wr, key::SPACE_ID)?;
                write_uint(wr, space.into())?;
                write_uint(wr, key::TUPLE)?;
                write_array(wr, &self.tuple)
            }

            pub(super) fn from_fields(mut fields: Fields) -> CodecResult<Self> {
                Ok(Self {
                    space: Target::Id(fields.u32(key::SPACE_ID)?),
                    tuple: fields.array_or_empty(key::TUPLE)?,
                })
            }
        }
    };
}

tuple_request!(Insert);
tuple_request!(Replace);

/// Delete the tuple matching `key` in `index`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub space: Target,
    pub index: Target,
    pub key: Vec<Value>,
}

impl Delete {
    /// Delete by primary key.
    pub fn new(space: impl Into<Target>, key: Vec<Value>) -> Self {
        Self {
            space: space.into(),
            index: Target::Id(0),
            key,
        }
    }

    pub fn index(mut self, index: impl Into<Target>) -> Self {
        self.index = index.into();
        self
    }

    pub(super) fn write_body<W: Write>(&self, ctx: &PackContext, wr: &mut W) -> CodecResult<()> {
        let space = ctx.space_id(&self.space)?;
        let index = ctx.index_id(space, &self.index)?;

        write_map_len(wr, 3)?;
        write_uint(wr, key::SPACE_ID)?;
        write_uint(wr, space.into())?;
        write_uint(wr, key::INDEX_ID)?;
        write_uint(wr, index.into())?;
        write_uint(wr, key::KEY)?;
        write_array(wr, &self.key)
    }

    pub(super) fn from_fields(mut fields: Fields) -> CodecResult<Self> {
        Ok(Self {
            space: Target::Id(fields.u32(key::SPACE_ID)?),
            index: Target::Id(fields.u32_or(key::INDEX_ID, 0)?),
            key: fields.array_or_empty(key::KEY)?,
        })
    }
}

/// Update operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    And,
    Or,
    Xor,
    /// Delete `arg` fields starting at the field number.
    Delete,
    /// Insert before the field number.
    Insert,
    Assign,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::And => "&",
            Operator::Or => "|",
            Operator::Xor => "^",
            Operator::Delete => "#",
            Operator::Insert => "!",
            Operator::Assign => "=",
        }
    }

    fn parse(op: &str) -> CodecResult<Self> {
        Ok(match op {
            "+" => Operator::Add,
            "-" => Operator::Sub,
            "&" => Operator::And,
            "|" => Operator::Or,
            "^" => Operator::Xor,
            "#" => Operator::Delete,
            "!" => Operator::Insert,
            "=" => Operator::Assign,
            other => {
                return Err(CodecError::malformed(format!(
                    "unknown update operator '{}'",
                    other
                )))
            }
        })
    }
}

/// One `[op, field, arg]` update step. Field numbers are zero based.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOp {
    pub op: Operator,
    pub field: u32,
    pub arg: Value,
}

impl UpdateOp {
    fn write<W: Write>(&self, wr: &mut W) -> CodecResult<()> {
        write_array_len(wr, 3)?;
        write_str(wr, self.op.as_str())?;
        write_uint(wr, self.field.into())?;
        write_value(wr, &self.arg)
    }

    fn from_value(value: Value) -> CodecResult<Self> {
        let Value::Array(parts) = value else {
            return Err(CodecError::malformed("update operation is not an array"));
        };
        let [op, field, arg]: [Value; 3] = parts
            .try_into()
            .map_err(|_| CodecError::malformed("update operation must have 3 parts"))?;

        let op = op
            .as_str()
            .ok_or_else(|| CodecError::malformed("update operator is not a string"))
            .and_then(Operator::parse)?;
        let field = field
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| CodecError::malformed("update field is not a field number"))?;

        Ok(Self { op, field, arg })
    }
}

/// Apply update operations to the tuple matching `key`.
///
/// ```
/// use iproto_client::query::{Operator, Update};
///
/// let update = Update::new(42u32, vec![3u64.into()])
///     .op(Operator::Assign, 2, 94u64)
///     .op(Operator::Add, 0, 1u64);
/// assert_eq!(update.ops.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub space: Target,
    pub index: Target,
    pub key: Vec<Value>,
    pub ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new(space: impl Into<Target>, key: Vec<Value>) -> Self {
        Self {
            space: space.into(),
            index: Target::Id(0),
            key,
            ops: Vec::new(),
        }
    }

    pub fn index(mut self, index: impl Into<Target>) -> Self {
        self.index = index.into();
        self
    }

    /// Append an operation.
    pub fn op(mut self, op: Operator, field: u32, arg: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp {
            op,
            field,
            arg: arg.into(),
        });
        self
    }

    pub(super) fn write_body<W: Write>(&self, ctx: &PackContext, wr: &mut W) -> CodecResult<()> {
        let space = ctx.space_id(&self.space)?;
        let index = ctx.index_id(space, &self.index)?;

        write_map_len(wr, 4)?;
        write_uint(wr, key::SPACE_ID)?;
        write_uint(wr, space.into())?;
        write_uint(wr, key::INDEX_ID)?;
        write_uint(wr, index.into())?;
        write_uint(wr, key::KEY)?;
        write_array(wr, &self.key)?;
        write_uint(wr, key::TUPLE)?;
        write_array_len(wr, self.ops.len())?;
        for op in &self.ops {
            op.write(wr)?;
        }
        Ok(())
    }

    pub(super) fn from_fields(mut fields: Fields) -> CodecResult<Self> {
        Ok(Self {
            space: Target::Id(fields.u32(key::SPACE_ID)?),
            index: Target::Id(fields.u32_or(key::INDEX_ID, 0)?),
            key: fields.array_or_empty(key::KEY)?,
            ops: fields
                .array_or_empty(key::TUPLE)?
                .into_iter()
                .map(UpdateOp::from_value)
                .collect::<CodecResult<_>>()?,
        })
    }
}
