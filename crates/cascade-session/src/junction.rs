//! Junction tables of ManyMany relations.
//!
//! A ManyMany relation is declared as `"join_table(col1, col2, ...)"`. The
//! listed columns are split into owner-side and related-side columns:
//!
//! - a column with a declared foreign key into the owner table is owner-side,
//!   one into the related table is related-side;
//! - when any column cannot be classified that way (no constraint, a
//!   constraint into a third table, or owner and related share a table) the
//!   whole list is mapped by position: the first `k` columns take the owner's
//!   `k` primary-key components, the rest take the related primary key.
//!
//! Reconciling rewrites the junction rows of one owner: every row of the owner
//! is deleted, then one row is inserted per related record currently in the
//! relation.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use cascade_core::{
    Attributes, Connection, Error, RecordGraph, RecordId, RelationDescriptor, Result, Row,
    SchemaProvider, TableSchema, Value, compare_keys, key_is_complete,
};

use crate::resolver::KeyPair;
use crate::sql;

static SPEC_PATTERN: OnceLock<Regex> = OnceLock::new();

fn spec_pattern() -> Result<&'static Regex> {
    if let Some(re) = SPEC_PATTERN.get() {
        return Ok(re);
    }
    let re = Regex::new(r"^\s*(\w+)\s*\(([^()]*)\)\s*$")
        .map_err(|e| Error::config(format!("invalid junction pattern: {}", e)))?;
    Ok(SPEC_PATTERN.get_or_init(|| re))
}

/// A parsed `"join_table(col1, col2, ...)"` specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionSpec {
    pub table: String,
    pub columns: Vec<String>,
}

impl JunctionSpec {
    pub fn parse(relation: &str, spec: &str) -> Result<Self> {
        let malformed = || {
            Error::relation_config(
                relation,
                format!(
                    "junction spec '{}' must look like 'join_table(col1, col2, ...)'",
                    spec
                ),
            )
        };
        let captures = spec_pattern()?.captures(spec).ok_or_else(malformed)?;
        let table = captures.get(1).map_or("", |m| m.as_str());
        let list = captures.get(2).map_or("", |m| m.as_str());
        let columns: Vec<String> = list.split(',').map(|c| c.trim().to_string()).collect();
        if columns.iter().any(String::is_empty) {
            return Err(malformed());
        }
        Ok(Self {
            table: table.to_string(),
            columns,
        })
    }
}

/// A junction table with its columns classified.
///
/// In each [`KeyPair`], `foreign` is the junction column and `referenced`
/// the owner (or related) column it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionMap {
    pub table: String,
    pub owner_columns: Vec<KeyPair>,
    pub related_columns: Vec<KeyPair>,
}

impl JunctionMap {
    /// Resolve the junction of a ManyMany relation declared on a record
    /// stored in `owner`.
    pub fn resolve<S: SchemaProvider + ?Sized>(
        relation: &RelationDescriptor,
        owner: &TableSchema,
        related: &TableSchema,
        schema: &S,
    ) -> Result<Self> {
        let name = relation.name.as_str();
        let Some(spec) = relation.foreign_key.junction_spec() else {
            return Err(Error::relation_config(
                name,
                "many_many relation needs a junction spec 'join_table(col1, col2, ...)'",
            ));
        };
        let spec = JunctionSpec::parse(name, spec)?;

        if !schema.has_table(&spec.table) {
            return Err(Error::relation_config(
                name,
                format!("junction table '{}' does not exist", spec.table),
            ));
        }
        let junction = schema.table(&spec.table)?;
        if let Some(column) = spec.columns.iter().find(|c| !junction.has_column(c)) {
            return Err(Error::relation_config(
                name,
                format!(
                    "junction column '{}' does not exist on table '{}'",
                    column, spec.table
                ),
            ));
        }

        let map = match classify(&spec, &junction, owner, related) {
            Some(map) => map,
            None => positional(name, &spec, owner, related)?,
        };
        if map.owner_columns.is_empty() {
            return Err(Error::relation_config(
                name,
                format!("junction '{}' has no column referencing '{}'", spec.table, owner.name),
            ));
        }
        if map.related_columns.is_empty() {
            return Err(Error::relation_config(
                name,
                format!(
                    "junction '{}' has no column referencing '{}'",
                    spec.table, related.name
                ),
            ));
        }

        tracing::trace!(
            relation = name,
            junction = %map.table,
            owner_columns = ?map.owner_columns,
            related_columns = ?map.related_columns,
            "Resolved junction"
        );
        Ok(map)
    }

    /// Look up both tables and resolve `relation` declared on `owner_table`.
    pub fn for_relation<S: SchemaProvider + ?Sized>(
        schema: &S,
        owner_table: &str,
        relation: &RelationDescriptor,
    ) -> Result<Self> {
        let owner = schema.table(owner_table)?;
        let related = schema.table(&relation.related_table)?;
        Self::resolve(relation, &owner, &related, schema)
    }

    /// Junction columns on the owner side.
    pub fn owner_junction_columns(&self) -> Vec<&str> {
        self.owner_columns.iter().map(|p| p.foreign.as_str()).collect()
    }

    /// Junction columns on the related side.
    pub fn related_junction_columns(&self) -> Vec<&str> {
        self.related_columns
            .iter()
            .map(|p| p.foreign.as_str())
            .collect()
    }

    /// Whether `column` carries part of either key.
    pub fn is_key_column(&self, column: &str) -> bool {
        self.owner_columns
            .iter()
            .chain(&self.related_columns)
            .any(|p| p.foreign == column)
    }

    /// Owner key values, in owner-column order. Missing attributes are NULL.
    pub fn owner_key(&self, owner: &Attributes) -> Vec<Value> {
        key_values(&self.owner_columns, owner)
    }

    /// Related key values, in related-column order.
    pub fn related_key(&self, related: &Attributes) -> Vec<Value> {
        key_values(&self.related_columns, related)
    }
}

fn key_values(pairs: &[KeyPair], attributes: &Attributes) -> Vec<Value> {
    pairs
        .iter()
        .map(|p| attributes.get(&p.referenced).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Classify every column by its declared foreign key, or give up.
fn classify(
    spec: &JunctionSpec,
    junction: &TableSchema,
    owner: &TableSchema,
    related: &TableSchema,
) -> Option<JunctionMap> {
    if owner.name == related.name {
        return None;
    }
    let mut map = JunctionMap {
        table: spec.table.clone(),
        owner_columns: Vec::new(),
        related_columns: Vec::new(),
    };
    for column in &spec.columns {
        let fk = junction.foreign_key_for(column)?;
        let pair = KeyPair {
            foreign: column.clone(),
            referenced: fk.foreign_column.clone(),
        };
        if fk.foreign_table == owner.name {
            map.owner_columns.push(pair);
        } else if fk.foreign_table == related.name {
            map.related_columns.push(pair);
        } else {
            return None;
        }
    }
    Some(map)
}

/// First `k` columns to the owner key, the rest to the related key.
fn positional(
    relation: &str,
    spec: &JunctionSpec,
    owner: &TableSchema,
    related: &TableSchema,
) -> Result<JunctionMap> {
    let owner_len = owner.primary_key.len().min(spec.columns.len());
    let (owner_side, related_side) = spec.columns.split_at(owner_len);
    if related_side.len() > related.primary_key.len() {
        return Err(Error::relation_config(
            relation,
            format!(
                "junction '{}' lists {} related column(s) but the primary key of '{}' has {}",
                spec.table,
                related_side.len(),
                related.name,
                related.primary_key.len()
            ),
        ));
    }
    let pair = |(column, key): (&String, &String)| KeyPair {
        foreign: column.clone(),
        referenced: key.clone(),
    };
    Ok(JunctionMap {
        table: spec.table.clone(),
        owner_columns: owner_side.iter().zip(&owner.primary_key).map(pair).collect(),
        related_columns: related_side
            .iter()
            .zip(&related.primary_key)
            .map(pair)
            .collect(),
    })
}

/// Rewrite the junction rows of `owner` to match `related`.
///
/// Deletes every row carrying the owner key, then inserts one row per related
/// record with the key columns filled in. The other columns come from its
/// junction overlay when initialized, else from the stored row of the same
/// pair, else they are left to the column default. Returns the number of rows
/// inserted.
#[tracing::instrument(level = "debug", skip(conn, graph, map, related), fields(junction = %map.table))]
pub(crate) fn reconcile<C: Connection + ?Sized>(
    conn: &C,
    graph: &RecordGraph,
    owner: RecordId,
    relation: &str,
    map: &JunctionMap,
    related: &[RecordId],
) -> Result<usize> {
    let owner_record = graph.record(owner)?;
    let owner_key = map.owner_key(owner_record.attributes());
    if !key_is_complete(&owner_key) {
        return Err(Error::usage(
            relation,
            format!("owner {} has no complete key to reconcile its junction rows", owner),
        ));
    }

    let stored = if related
        .iter()
        .any(|member| owner_record.overlay(relation, *member).is_none())
    {
        let select = sql::select::<&str, _>(&map.table, &[], &map.owner_junction_columns(), None);
        tracing::trace!(sql = %select, "Loading stored junction rows");
        conn.query(&select, &owner_key)?
    } else {
        Vec::new()
    };

    let delete_sql = sql::delete(&map.table, &map.owner_junction_columns());
    tracing::trace!(sql = %delete_sql, "Executing junction DELETE");
    conn.execute(&delete_sql, &owner_key)?;

    let mut seen = HashSet::new();
    let mut inserted = 0;
    for &member in related {
        if !seen.insert(member) {
            continue;
        }
        let related_key = map.related_key(graph.record(member)?.attributes());
        if !key_is_complete(&related_key) {
            return Err(Error::usage(
                relation,
                format!("related record {} has no complete key", member),
            ));
        }

        let mut row = match owner_record.overlay(relation, member) {
            Some(overlay) => overlay.clone(),
            None => stored_attributes(map, &stored, &related_key),
        };
        for (pair, value) in map.owner_columns.iter().zip(&owner_key) {
            row.insert(pair.foreign.clone(), value.clone());
        }
        for (pair, value) in map.related_columns.iter().zip(related_key) {
            row.insert(pair.foreign.clone(), value);
        }

        let columns: Vec<&String> = row.keys().collect();
        let values: Vec<Value> = row.values().cloned().collect();
        let insert_sql = sql::insert(&map.table, &columns);
        tracing::trace!(sql = %insert_sql, "Executing junction INSERT");
        conn.execute(&insert_sql, &values)?;
        inserted += 1;
    }

    tracing::debug!(
        relation,
        owner = %owner,
        rows = inserted,
        "Reconciled junction rows"
    );
    Ok(inserted)
}

/// Non-key columns of the stored row whose related key is `related_key`.
fn stored_attributes(map: &JunctionMap, stored: &[Row], related_key: &[Value]) -> Attributes {
    let matches = |row: &&Row| {
        let key: Vec<Value> = map
            .related_columns
            .iter()
            .map(|pair| row.get_by_name(&pair.foreign).cloned().unwrap_or(Value::Null))
            .collect();
        compare_keys(&key, related_key) == Ordering::Equal
    };
    stored
        .iter()
        .find(matches)
        .map(|row| {
            row.iter()
                .filter(|(column, _)| !map.is_key_column(column))
                .map(|(column, value)| (column.to_string(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}
