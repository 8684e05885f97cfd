//! SQLite schema introspection.
//!
//! Reads table metadata with `PRAGMA table_info` and
//! `PRAGMA foreign_key_list`. [`IntrospectedSchema`] wraps an
//! [`Introspector`] as a [`SchemaProvider`] and caches each table the first
//! time it is asked for.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cascade_core::{
    Connection, Error, ForeignKeyInfo, Result, SchemaProvider, TableSchema, quote_ident,
};

use crate::static_schema::StaticSchema;

/// Reads table metadata from a SQLite connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Introspector;

impl Introspector {
    pub fn new() -> Self {
        Self
    }

    /// List all user table names in the database.
    pub fn table_names<C: Connection + ?Sized>(&self, conn: &C) -> Result<Vec<String>> {
        let rows = conn.query(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(0).and_then(|v| v.as_str().map(String::from)))
            .collect())
    }

    /// Describe one table. Fails with a schema error when it does not exist.
    pub fn table_schema<C: Connection + ?Sized>(
        &self,
        conn: &C,
        table_name: &str,
    ) -> Result<TableSchema> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table_name));
        let rows = conn.query(&sql, &[])?;
        if rows.is_empty() {
            return Err(Error::table_not_found(table_name));
        }

        let mut columns = Vec::with_capacity(rows.len());
        let mut keyed: Vec<(i64, String)> = Vec::new();
        for row in &rows {
            let name = row.get_named::<String>("name")?;
            // pk is the 1-based position in the primary key, 0 otherwise
            let pk = row.get_named::<Option<i64>>("pk")?.unwrap_or(0);
            if pk > 0 {
                keyed.push((pk, name.clone()));
            }
            columns.push(name);
        }
        keyed.sort_by_key(|(position, _)| *position);
        let primary_key: Vec<String> = keyed.into_iter().map(|(_, name)| name).collect();

        let foreign_keys = self.foreign_keys(conn, table_name)?;

        tracing::debug!(
            table = table_name,
            columns = columns.len(),
            primary_key = ?primary_key,
            foreign_keys = foreign_keys.len(),
            "Introspected table"
        );

        Ok(TableSchema {
            name: table_name.to_string(),
            columns,
            primary_key,
            foreign_keys,
        })
    }

    fn foreign_keys<C: Connection + ?Sized>(
        &self,
        conn: &C,
        table_name: &str,
    ) -> Result<Vec<ForeignKeyInfo>> {
        let sql = format!("PRAGMA foreign_key_list({})", quote_ident(table_name));
        let rows = conn.query(&sql, &[])?;

        let mut fks = Vec::with_capacity(rows.len());
        for row in &rows {
            let table = row.get_named::<String>("table")?;
            let from = row.get_named::<String>("from")?;
            let seq = row.get_named::<Option<i64>>("seq")?.unwrap_or(0);
            // `REFERENCES parent` without a column list leaves `to` NULL;
            // the reference is then the parent's primary key at `seq`.
            let to = match row.get_named::<Option<String>>("to")? {
                Some(to) => to,
                None => self.parent_key_column(conn, &table, seq)?,
            };
            fks.push(ForeignKeyInfo::new(from, table, to));
        }
        Ok(fks)
    }

    fn parent_key_column<C: Connection + ?Sized>(
        &self,
        conn: &C,
        parent: &str,
        seq: i64,
    ) -> Result<String> {
        let sql = format!("PRAGMA table_info({})", quote_ident(parent));
        let rows = conn.query(&sql, &[])?;
        let mut keyed: Vec<(i64, String)> = Vec::new();
        for row in &rows {
            let pk = row.get_named::<Option<i64>>("pk")?.unwrap_or(0);
            if pk > 0 {
                keyed.push((pk, row.get_named::<String>("name")?));
            }
        }
        keyed.sort_by_key(|(position, _)| *position);
        usize::try_from(seq)
            .ok()
            .and_then(|i| keyed.into_iter().nth(i))
            .map(|(_, name)| name)
            .ok_or_else(|| {
                Error::Schema(cascade_core::SchemaError {
                    kind: cascade_core::SchemaErrorKind::Introspection,
                    message: format!(
                        "foreign key into '{}' references primary key component {} which does not exist",
                        parent, seq
                    ),
                })
            })
    }

    /// Describe every table in the database.
    pub fn introspect_all<C: Connection + ?Sized>(&self, conn: &C) -> Result<StaticSchema> {
        let mut schema = StaticSchema::new();
        for name in self.table_names(conn)? {
            schema.insert(self.table_schema(conn, &name)?);
        }
        Ok(schema)
    }
}

/// A [`SchemaProvider`] that introspects tables on demand and caches them.
///
/// The cache never expires on its own; call [`IntrospectedSchema::invalidate`]
/// after altering a table.
pub struct IntrospectedSchema<C> {
    conn: C,
    introspector: Introspector,
    cache: RwLock<HashMap<String, Arc<TableSchema>>>,
}

impl<C: Connection> IntrospectedSchema<C> {
    /// Wrap a connection (or a reference to one).
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            introspector: Introspector::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Drop the cached entry for a table.
    pub fn invalidate(&self, table: &str) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.remove(table);
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.clear();
    }

    /// Number of cached tables.
    pub fn cached_tables(&self) -> usize {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.len()
    }
}

impl<C: Connection> SchemaProvider for IntrospectedSchema<C> {
    fn table(&self, name: &str) -> Result<Arc<TableSchema>> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(table) = cache.get(name) {
                return Ok(Arc::clone(table));
            }
        }

        let table = Arc::new(self.introspector.table_schema(&self.conn, name)?);
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }
}

impl<C> std::fmt::Debug for IntrospectedSchema<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrospectedSchema").finish_non_exhaustive()
    }
}
