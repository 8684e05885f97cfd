//! Schema metadata consumed by the relation resolver and junction reconciler.
//!
//! The engine needs four facts about a table: its name, its column list, its
//! primary-key columns (in key order) and its declared foreign-key
//! constraints. Where those facts come from is up to the [`SchemaProvider`];
//! `cascade-schema` ships a static and a SQLite-introspecting implementation.

use crate::error::Result;
use std::sync::Arc;

/// Information about a foreign key constraint on a single column.
///
/// Composite constraints are represented as one entry per column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    /// Local column name
    pub column: String,
    /// Referenced table
    pub foreign_table: String,
    /// Referenced column
    pub foreign_column: String,
}

impl ForeignKeyInfo {
    /// Create a foreign key entry.
    pub fn new(
        column: impl Into<String>,
        foreign_table: impl Into<String>,
        foreign_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            foreign_table: foreign_table.into(),
            foreign_column: foreign_column.into(),
        }
    }
}

/// Metadata about one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Column names in declaration order
    pub columns: Vec<String>,
    /// Primary key column names, in key order
    pub primary_key: Vec<String>,
    /// Foreign key constraints
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

impl TableSchema {
    /// Start describing a table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Add a plain column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(name.into());
        self
    }

    /// Add several plain columns.
    #[must_use]
    pub fn columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add a column that is (part of) the primary key.
    #[must_use]
    pub fn primary_key_column(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.primary_key.push(name.clone());
        if !self.columns.contains(&name) {
            self.columns.push(name);
        }
        self
    }

    /// Declare a foreign key constraint on an existing or new column.
    #[must_use]
    pub fn foreign_key(
        mut self,
        column: impl Into<String>,
        foreign_table: impl Into<String>,
        foreign_column: impl Into<String>,
    ) -> Self {
        let fk = ForeignKeyInfo::new(column, foreign_table, foreign_column);
        if !self.columns.contains(&fk.column) {
            self.columns.push(fk.column.clone());
        }
        self.foreign_keys.push(fk);
        self
    }

    /// Check if a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Get the declared foreign key on a column, if any.
    pub fn foreign_key_for(&self, column: &str) -> Option<&ForeignKeyInfo> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }

    /// Whether a column is part of the primary key.
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }
}

/// Supplies table metadata by table name.
///
/// Table names are compared exactly; providers that talk to a database with
/// case-insensitive identifiers normalize on their side.
pub trait SchemaProvider {
    /// Get metadata for a table, or a schema error if it does not exist.
    fn table(&self, name: &str) -> Result<Arc<TableSchema>>;

    /// Whether the table exists.
    fn has_table(&self, name: &str) -> bool {
        self.table(name).is_ok()
    }
}

impl<S: SchemaProvider + ?Sized> SchemaProvider for &S {
    fn table(&self, name: &str) -> Result<Arc<TableSchema>> {
        (**self).table(name)
    }

    fn has_table(&self, name: &str) -> bool {
        (**self).has_table(name)
    }
}
