//! Foreign-key map resolution for BelongsTo, HasOne and HasMany relations.
//!
//! A column-list foreign key spec names the foreign key columns on the
//! *dependent* table (the owner for BelongsTo, the related table for HasOne
//! and HasMany). Each entry is paired with a column of the *referenced* table:
//!
//! 1. `fk => pk` names the referenced column explicitly;
//! 2. otherwise a declared foreign-key constraint from `fk` into the
//!    referenced table supplies it;
//! 3. otherwise entry `i` pairs with primary-key component `i`.

use cascade_core::{
    Error, ForeignKeySpec, RelationDescriptor, RelationKind, Result, TableSchema,
};

/// One foreign key column and the column it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// Column on the dependent table.
    pub foreign: String,
    /// Column on the referenced table.
    pub referenced: String,
}

/// Ordered foreign key pairs of one relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMap {
    pairs: Vec<KeyPair>,
}

impl KeyMap {
    pub fn pairs(&self) -> &[KeyPair] {
        &self.pairs
    }

    /// Columns on the dependent table, in spec order.
    pub fn foreign_columns(&self) -> Vec<&str> {
        self.pairs.iter().map(|p| p.foreign.as_str()).collect()
    }

    /// Columns on the referenced table, in spec order.
    pub fn referenced_columns(&self) -> Vec<&str> {
        self.pairs.iter().map(|p| p.referenced.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Resolve a relation's key map, picking the dependent side from its kind.
///
/// `owner` is the table of the record declaring the relation, `related` the
/// relation's target table.
pub fn resolve_relation_keys(
    relation: &RelationDescriptor,
    owner: &TableSchema,
    related: &TableSchema,
) -> Result<KeyMap> {
    match relation.kind {
        RelationKind::BelongsTo => resolve_key_map(relation, owner, related),
        RelationKind::HasOne | RelationKind::HasMany => resolve_key_map(relation, related, owner),
        RelationKind::ManyMany => Err(Error::relation_config(
            &relation.name,
            "many_many relations are joined through a junction table, not a key map",
        )),
    }
}

/// Resolve `relation`'s column-list spec from `dependent` into `referenced`.
pub fn resolve_key_map(
    relation: &RelationDescriptor,
    dependent: &TableSchema,
    referenced: &TableSchema,
) -> Result<KeyMap> {
    let entries = match &relation.foreign_key {
        ForeignKeySpec::Columns(entries) => entries,
        ForeignKeySpec::Junction(spec) => {
            return Err(Error::relation_config(
                &relation.name,
                format!(
                    "{} relation needs foreign key columns, found junction spec '{}'",
                    relation.kind, spec
                ),
            ));
        }
    };
    if entries.is_empty() {
        return Err(Error::relation_config(
            &relation.name,
            "foreign key spec names no columns",
        ));
    }

    let mut pairs = Vec::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        if !dependent.has_column(&entry.column) {
            return Err(Error::relation_config(
                &relation.name,
                format!(
                    "foreign key column '{}' does not exist on table '{}'",
                    entry.column, dependent.name
                ),
            ));
        }

        let referenced_column = match &entry.references {
            Some(column) => column.clone(),
            None => match dependent
                .foreign_key_for(&entry.column)
                .filter(|fk| fk.foreign_table == referenced.name)
            {
                Some(fk) => fk.foreign_column.clone(),
                None => referenced
                    .primary_key
                    .get(position)
                    .cloned()
                    .ok_or_else(|| {
                        Error::relation_config(
                            &relation.name,
                            format!(
                                "foreign key column '{}' is entry {} but the primary key of '{}' has {} column(s)",
                                entry.column,
                                position + 1,
                                referenced.name,
                                referenced.primary_key.len()
                            ),
                        )
                    })?,
            },
        };

        if !referenced.has_column(&referenced_column) {
            return Err(Error::relation_config(
                &relation.name,
                format!(
                    "referenced column '{}' does not exist on table '{}'",
                    referenced_column, referenced.name
                ),
            ));
        }

        pairs.push(KeyPair {
            foreign: entry.column.clone(),
            referenced: referenced_column,
        });
    }

    tracing::trace!(
        relation = %relation.name,
        dependent = %dependent.name,
        referenced = %referenced.name,
        pairs = ?pairs,
        "Resolved key map"
    );
    Ok(KeyMap { pairs })
}
