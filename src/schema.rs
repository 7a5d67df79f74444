//! Schema lookup: space and index names to numeric ids.
//!
//! The wire only carries numeric space/index ids. Queries may name their
//! target instead; [`PackContext`] resolves those names through a
//! [`SchemaLookup`] while packing. How the lookup is populated and refreshed
//! is up to its implementor; [`StaticSchema`] is a fixed map.
//!
//! # Example
//!
//! ```
//! use iproto_client::schema::{PackContext, StaticSchema, Target};
//!
//! let schema = StaticSchema::new()
//!     .space("tester", 42)
//!     .index(42, "id_name", 2);
//! let ctx = PackContext::new(schema);
//!
//! assert_eq!(ctx.space_id(&Target::from("tester")).unwrap(), 42);
//! assert_eq!(ctx.index_id(42, &Target::from("id_name")).unwrap(), 2);
//! assert_eq!(ctx.space_id(&Target::from(512u32)).unwrap(), 512);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{CodecError, CodecResult};

/// Resolves human-readable names to wire ids.
pub trait SchemaLookup: Send + Sync + 'static {
    /// Id of the space called `name`.
    fn resolve_space(&self, name: &str) -> CodecResult<u32>;

    /// Id of index `name` within space `space`.
    fn resolve_index(&self, space: u32, name: &str) -> CodecResult<u32>;
}

/// A space or index given either by name or by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Id(u32),
    Name(String),
}

impl From<u32> for Target {
    fn from(id: u32) -> Self {
        Target::Id(id)
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Name(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Name(name)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Id(id) => write!(f, "#{}", id),
            Target::Name(name) => f.write_str(name),
        }
    }
}

/// Lookup that knows no names; only numeric targets can be packed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSchema;

impl SchemaLookup for NoSchema {
    fn resolve_space(&self, name: &str) -> CodecResult<u32> {
        Err(CodecError::UnknownSpace(name.to_string()))
    }

    fn resolve_index(&self, space: u32, name: &str) -> CodecResult<u32> {
        Err(CodecError::UnknownIndex {
            space,
            index: name.to_string(),
        })
    }
}

/// Fixed name -> id map.
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    spaces: HashMap<String, u32>,
    indexes: HashMap<(u32, String), u32>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a space.
    pub fn space(mut self, name: &str, id: u32) -> Self {
        self.add_space(name, id);
        self
    }

    /// Register an index of space `space`.
    pub fn index(mut self, space: u32, name: &str, id: u32) -> Self {
        self.add_index(space, name, id);
        self
    }

    pub fn add_space(&mut self, name: &str, id: u32) {
        self.spaces.insert(name.to_string(), id);
    }

    pub fn add_index(&mut self, space: u32, name: &str, id: u32) {
        self.indexes.insert((space, name.to_string()), id);
    }
}

impl SchemaLookup for StaticSchema {
    fn resolve_space(&self, name: &str) -> CodecResult<u32> {
        self.spaces
            .get(name)
            .copied()
            .ok_or_else(|| CodecError::UnknownSpace(name.to_string()))
    }

    fn resolve_index(&self, space: u32, name: &str) -> CodecResult<u32> {
        self.indexes
            .get(&(space, name.to_string()))
            .copied()
            .ok_or_else(|| CodecError::UnknownIndex {
                space,
                index: name.to_string(),
            })
    }
}

/// Everything the codec consults while packing a query.
#[derive(Clone)]
pub struct PackContext {
    schema: Arc<dyn SchemaLookup>,
}

impl PackContext {
    pub fn new<S: SchemaLookup>(schema: S) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    /// Share an existing lookup.
    pub fn from_shared(schema: Arc<dyn SchemaLookup>) -> Self {
        Self { schema }
    }

    /// Numeric id of a space target.
    pub fn space_id(&self, space: &Target) -> CodecResult<u32> {
        match space {
            Target::Id(id) => Ok(*id),
            Target::Name(name) => self.schema.resolve_space(name),
        }
    }

    /// Numeric id of an index target within `space`.
    pub fn index_id(&self, space: u32, index: &Target) -> CodecResult<u32> {
        match index {
            Target::Id(id) => Ok(*id),
            Target::Name(name) => self.schema.resolve_index(space, name),
        }
    }
}

impl Default for PackContext {
    fn default() -> Self {
        Self::new(NoSchema)
    }
}

impl fmt::Debug for PackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackContext").finish_non_exhaustive()
    }
}
