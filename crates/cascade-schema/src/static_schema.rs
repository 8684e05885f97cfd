//! Schema metadata declared in code.

use std::collections::HashMap;
use std::sync::Arc;

use cascade_core::{Error, Result, SchemaProvider, TableSchema};

/// A fixed set of table descriptions.
///
/// ```rust,ignore
/// let schema = StaticSchema::new()
///     .table(TableSchema::new("post").primary_key_column("id").column("title"))
///     .table(
///         TableSchema::new("comment")
///             .primary_key_column("id")
///             .foreign_key("post_id", "post", "id"),
///     );
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    tables: HashMap<String, Arc<TableSchema>>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table.
    #[must_use]
    pub fn table(mut self, table: TableSchema) -> Self {
        self.insert(table);
        self
    }

    /// Add (or replace) a table in place.
    pub fn insert(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), Arc::new(table));
    }

    /// Names of all known tables, sorted.
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl SchemaProvider for StaticSchema {
    fn table(&self, name: &str) -> Result<Arc<TableSchema>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::table_not_found(name))
    }

    fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

impl FromIterator<TableSchema> for StaticSchema {
    fn from_iter<T: IntoIterator<Item = TableSchema>>(iter: T) -> Self {
        let mut schema = StaticSchema::new();
        for table in iter {
            schema.insert(table);
        }
        schema
    }
}
