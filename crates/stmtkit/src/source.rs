//! Logical sources and their physical tables.

use crate::error::{DbError, DbResult};
use std::collections::HashMap;

/// A logical source name bound to a physical table.
///
/// ```ignore
/// let orders = Source::new("orders").table("shop_orders").schema("sales");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    name: String,
    table: String,
    schema: Option<String>,
}

impl Source {
    /// Create a source whose table has the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: name.clone(),
            name,
            schema: None,
        }
    }

    /// Set the physical table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Set the schema qualifying the table.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn schema_name(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

/// Registry of known logical sources.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Source>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source, replacing one with the same logical name.
    pub fn register(&mut self, source: Source) -> &mut Self {
        self.sources.insert(source.name.clone(), source);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, source: Source) -> Self {
        self.register(source);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.get(name)
    }

    /// Look up a source, failing with a configuration error when unknown.
    pub fn require(&self, name: &str) -> DbResult<&Source> {
        self.get(name)
            .ok_or_else(|| DbError::configuration(format!("unknown source '{name}'")))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl FromIterator<Source> for SourceRegistry {
    fn from_iter<I: IntoIterator<Item = Source>>(iter: I) -> Self {
        let mut registry = SourceRegistry::new();
        for source in iter {
            registry.register(source);
        }
        registry
    }
}
