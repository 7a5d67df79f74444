//! Index scans.

use std::io::Write;

use super::Fields;
use crate::codec::{write_array, write_map_len, write_uint, Value};
use crate::error::{CodecError, CodecResult};
use crate::protocol::key;
use crate::schema::{PackContext, Target};

/// How an index is traversed relative to the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum IteratorType {
    #[default]
    Eq = 0,
    /// Reverse equality.
    Req = 1,
    All = 2,
    Lt = 3,
    Le = 4,
    Ge = 5,
    Gt = 6,
    BitsAllSet = 7,
    BitsAnySet = 8,
    BitsAllNotSet = 9,
    Overlaps = 10,
    Neighbor = 11,
}

impl TryFrom<u64> for IteratorType {
    type Error = CodecError;

    fn try_from(raw: u64) -> CodecResult<Self> {
        Ok(match raw {
            0 => IteratorType::Eq,
            1 => IteratorType::Req,
            2 => IteratorType::All,
            3 => IteratorType::Lt,
            4 => IteratorType::Le,
            5 => IteratorType::Ge,
            6 => IteratorType::Gt,
            7 => IteratorType::BitsAllSet,
            8 => IteratorType::BitsAnySet,
            9 => IteratorType::BitsAllNotSet,
            10 => IteratorType::Overlaps,
            11 => IteratorType::Neighbor,
            other => {
                return Err(CodecError::malformed(format!(
                    "unknown iterator type {}",
                    other
                )))
            }
        })
    }
}

/// Select tuples from a space by index key.
///
/// ```
/// use iproto_client::query::{IteratorType, Select};
///
/// let select = Select::new("tester")
///     .index("id_name")
///     .key(vec![2u64.into(), "Music".into()])
///     .iterator(IteratorType::Eq)
///     .limit(10);
/// assert_eq!(select.limit, 10);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub space: Target,
    pub index: Target,
    pub key: Vec<Value>,
    pub limit: u32,
    pub offset: u32,
    pub iterator: IteratorType,
}

impl Select {
    /// Select from `space` over the primary index, no limit.
    pub fn new(space: impl Into<Target>) -> Self {
        Self {
            space: space.into(),
            index: Target::Id(0),
            key: Vec::new(),
            limit: u32::MAX,
            offset: 0,
            iterator: IteratorType::Eq,
        }
    }

    pub fn index(mut self, index: impl Into<Target>) -> Self {
        self.index = index.into();
        self
    }

    pub fn key(mut self, key: Vec<Value>) -> Self {
        self.key = key;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn iterator(mut self, iterator: IteratorType) -> Self {
        self.iterator = iterator;
        self
    }

    pub(super) fn write_body<W: Write>(&self, ctx: &PackContext, wr: &mut W) -> CodecResult<()> {
        let space = ctx.space_id(&self.space)?;
        let index = ctx.index_id(space, &self.index)?;

        write_map_len(wr, 6)?;
        write_uint(wr, key::SPACE_ID)?;
        write_uint(wr, space.into())?;
        write_uint(wr, key::INDEX_ID)?;
        write_uint(wr, index.into())?;
        write_uint(wr, key::OFFSET)?;
        write_uint(wr, self.offset.into())?;
        write_uint(wr, key::LIMIT)?;
        write_uint(wr, self.limit.into())?;
        write_uint(wr, key::ITERATOR)?;
        write_uint(wr, self.iterator as u64)?;
        write_uint(wr, key::KEY)?;
        write_array(wr, &self.key)
    }

    pub(super) fn from_fields(mut fields: Fields) -> CodecResult<Self> {
        Ok(Self {
            space: Target::Id(fields.u32(key::SPACE_ID)?),
            index: Target::Id(fields.u32_or(key::INDEX_ID, 0)?),
            key: fields.array_or_empty(key::KEY)?,
            limit: fields.u32_or(key::LIMIT, u32::MAX)?,
            offset: fields.u32_or(key::OFFSET, 0)?,
            iterator: IteratorType::try_from(fields.uint_or(key::ITERATOR, 0)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchema;

    #[test]
    fn test_defaults() {
        let select = Select::new(42u32);
        assert_eq!(select.index, Target::Id(0));
        assert_eq!(select.limit, u32::MAX);
        assert_eq!(select.offset, 0);
        assert_eq!(select.iterator, IteratorType::Eq);
        assert!(select.key.is_empty());
    }

    #[test]
    fn test_names_resolved_when_written() {
        let ctx = PackContext::new(StaticSchema::new().space("tester", 42).index(42, "id_name", 2));
        let mut body = Vec::new();
        Select::new("tester")
            .index("id_name")
            .write_body(&ctx, &mut body)
            .unwrap();
        // {0x10: 42, 0x11: 2, ...}
        assert_eq!(body[..5], [0x86, 0x10, 42, 0x11, 2]);
    }

    #[test]
    fn test_unknown_index_fails() {
        let ctx = PackContext::new(StaticSchema::new().space("tester", 42));
        let mut body = Vec::new();
        let err = Select::new("tester")
            .index("missing")
            .write_body(&ctx, &mut body)
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownIndex { space: 42, .. }));
    }

    #[test]
    fn test_iterator_codes() {
        assert_eq!(IteratorType::All as u8, 2);
        assert_eq!(IteratorType::try_from(6).unwrap(), IteratorType::Gt);
        assert!(IteratorType::try_from(99).is_err());
    }
}
