//! Relation metadata.
//!
//! Every relation a model declares is described by a [`RelationDescriptor`]:
//! its name, its [`RelationKind`], the table of the target record type and a
//! [`ForeignKeySpec`]. The kind is a closed set decided once when the model is
//! defined; the engine dispatches on it with one handler per variant.

use std::fmt;

/// The cardinality of a relation, seen from the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Many-to-one: the owner row carries the foreign key (`comment.post_id`).
    BelongsTo,
    /// One-to-one: the related row carries the foreign key.
    HasOne,
    /// One-to-many: every related row carries the foreign key.
    HasMany,
    /// Many-to-many via a junction table.
    ManyMany,
}

impl RelationKind {
    /// Whether the loaded value of this relation is a collection.
    pub const fn is_collection(self) -> bool {
        matches!(self, RelationKind::HasMany | RelationKind::ManyMany)
    }

    /// Whether the owner row depends on the related row's key.
    pub const fn owner_is_dependent(self) -> bool {
        matches!(self, RelationKind::BelongsTo)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::HasOne => "has_one",
            RelationKind::HasMany => "has_many",
            RelationKind::ManyMany => "many_many",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a column-list foreign key specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    /// Foreign key column on the dependent table.
    pub column: String,
    /// Explicitly referenced column on the other table. `None` means the
    /// referenced column is inferred (declared constraint or key position).
    pub references: Option<String>,
}

impl KeyColumn {
    /// A positional entry.
    pub fn positional(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            references: None,
        }
    }

    /// An explicit `fk => pk` entry.
    pub fn explicit(column: impl Into<String>, references: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            references: Some(references.into()),
        }
    }

    /// Parse `col`, `col => target` or `col -> target`.
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        let split = entry.split_once("=>").or_else(|| entry.split_once("->"));
        Some(match split {
            Some((fk, pk)) => Self::explicit(fk.trim(), pk.trim()),
            None => Self::positional(entry),
        })
    }
}

/// How the two sides of a relation are joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForeignKeySpec {
    /// Ordered foreign key columns (BelongsTo, HasOne, HasMany).
    Columns(Vec<KeyColumn>),
    /// Junction specification `"join_table(col1, col2, ...)"` (ManyMany).
    ///
    /// Kept verbatim; the junction reconciler validates it against the schema.
    Junction(String),
}

impl ForeignKeySpec {
    /// Parse a comma separated column list such as `"author_id"` or
    /// `"tenant_id, owner_id => id"`. Empty entries are skipped.
    pub fn columns(spec: &str) -> Self {
        ForeignKeySpec::Columns(spec.split(',').filter_map(KeyColumn::parse).collect())
    }

    /// Build a column list from already separated entries.
    pub fn column_list<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ForeignKeySpec::Columns(
            entries
                .into_iter()
                .filter_map(|e| KeyColumn::parse(e.as_ref()))
                .collect(),
        )
    }

    /// Wrap a junction specification.
    pub fn junction(spec: impl Into<String>) -> Self {
        ForeignKeySpec::Junction(spec.into())
    }

    /// The junction specification, for a ManyMany spec.
    pub fn junction_spec(&self) -> Option<&str> {
        match self {
            ForeignKeySpec::Junction(spec) => Some(spec),
            ForeignKeySpec::Columns(_) => None,
        }
    }
}

/// Metadata about one declared relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Name of the relation on the owner.
    pub name: String,
    /// Kind of relation.
    pub kind: RelationKind,
    /// Table of the target record type.
    pub related_table: String,
    /// Foreign key specification.
    pub foreign_key: ForeignKeySpec,
}

impl RelationDescriptor {
    /// Create a relation from its parts.
    pub fn new(
        name: impl Into<String>,
        kind: RelationKind,
        related_table: impl Into<String>,
        foreign_key: ForeignKeySpec,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            related_table: related_table.into(),
            foreign_key,
        }
    }

    /// `owner.fk -> related.pk`
    pub fn belongs_to(name: impl Into<String>, related_table: impl Into<String>, fk: &str) -> Self {
        Self::new(
            name,
            RelationKind::BelongsTo,
            related_table,
            ForeignKeySpec::columns(fk),
        )
    }

    /// `related.fk -> owner.pk`, single related record
    pub fn has_one(name: impl Into<String>, related_table: impl Into<String>, fk: &str) -> Self {
        Self::new(
            name,
            RelationKind::HasOne,
            related_table,
            ForeignKeySpec::columns(fk),
        )
    }

    /// `related.fk -> owner.pk`, collection of related records
    pub fn has_many(name: impl Into<String>, related_table: impl Into<String>, fk: &str) -> Self {
        Self::new(
            name,
            RelationKind::HasMany,
            related_table,
            ForeignKeySpec::columns(fk),
        )
    }

    /// Related through `"join_table(owner_cols.., related_cols..)"`
    pub fn many_many(
        name: impl Into<String>,
        related_table: impl Into<String>,
        junction: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            RelationKind::ManyMany,
            related_table,
            ForeignKeySpec::junction(junction),
        )
    }
}
