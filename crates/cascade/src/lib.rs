//! Cascade - cascading persistence and validation for graphs of related
//! database records.
//!
//! Cascade saves or validates a record together with the related records a
//! *processed relation tree* selects:
//!
//! - BelongsTo targets are written before their owner so the owner's foreign
//!   key can be filled in
//! - HasOne and HasMany dependents are written after it, and HasMany rows no
//!   longer in the loaded collection are deleted
//! - ManyMany junction rows are rewritten to match the loaded collection,
//!   carrying per-pair extra attributes
//! - everything happens inside one transaction
//!
//! # Quick Start
//!
//! ```ignore
//! use cascade::prelude::*;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw(SCHEMA_SQL)?;
//! let schema = IntrospectedSchema::new(&conn);
//!
//! let post_model = ModelDef::new("Post", "post")
//!     .relation(RelationDescriptor::has_many("comments", "comment", "post_id"))
//!     .relation(RelationDescriptor::many_many("tags", "tag", "post_tag(post_id, tag_id)"))
//!     .validator(RuleValidator::new().rule("title", Rule::Required))
//!     .build();
//!
//! let mut graph = RecordGraph::new();
//! let post = graph.create(&post_model, [("title", "Hello")]);
//! let comment = graph.create(&comment_model, [("body", "First!")]);
//! graph.push_related(post, "comments", comment)?;
//!
//! let cascade = Cascade::new(&conn, &schema);
//! let saved = cascade.save_with(&mut graph, post, &SaveOptions::new().with("comments"))?;
//! ```
//!
//! # Crates
//!
//! | crate | contents |
//! |-------|----------|
//! | `cascade-core` | values, rows, errors, the `Connection` trait, records and relation trees |
//! | `cascade-schema` | `StaticSchema` and the SQLite `IntrospectedSchema` |
//! | `cascade-sqlite` | the SQLite driver |
//! | `cascade-session` | the engine |

pub use cascade_core::{
    Attributes, ColumnInfo, Connection, DefaultRelationTreeProvider, Error, FieldErrors,
    ForeignKeyInfo, ForeignKeySpec, FromValue, IsolationLevel, KeyColumn, ModelDef, Partition,
    Record, RecordGraph, RecordId, RecordValidator, Related, RelatedErrors, RelationDescriptor,
    RelationKind, RelationTree, Result, Row, Rule, RuleValidator, SchemaProvider, TableSchema,
    ValidationErrorTree, Value, compare_keys, key_is_complete, quote_ident,
};
pub use cascade_core::error::{
    ConfigError, ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind, SchemaError,
    SchemaErrorKind, TransactionError, TransactionErrorKind, TypeError, UsageError,
};

pub use cascade_schema::{IntrospectedSchema, Introspector, StaticSchema};

pub use cascade_session::{
    Cascade, CascadeConfig, JunctionMap, JunctionSpec, KeyMap, KeyPair, SaveOptions, SaveSession,
    SaveStats, ValidateOptions, clear_errors_tree, relation_tree, resolve_key_map,
    resolve_relation_keys, save_graph, validate_tree,
};

pub use cascade_sqlite::{OpenFlags, SqliteConfig, SqliteConnection};

/// Commonly used types, for glob import.
pub mod prelude {
    pub use crate::{
        // Engine
        Cascade,
        CascadeConfig,
        // Core
        Connection,
        Error,
        // Schema
        IntrospectedSchema,
        ModelDef,
        RecordGraph,
        RecordId,
        Related,
        RelationDescriptor,
        RelationTree,
        Result,
        Row,
        Rule,
        RuleValidator,
        SaveOptions,
        SchemaProvider,
        // SQLite
        SqliteConnection,
        StaticSchema,
        TableSchema,
        ValidateOptions,
        ValidationErrorTree,
        Value,
        relation_tree,
    };
}
