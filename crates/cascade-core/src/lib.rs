//! Core types and traits for Cascade.
//!
//! This crate provides the shared vocabulary of the cascading engine:
//!
//! - `Value` and `Row` for data exchanged with storage
//! - `Connection` trait for the synchronous storage collaborator
//! - `SchemaProvider` trait and `TableSchema` metadata
//! - `RelationDescriptor` / `ModelDef` for declaring record types
//! - `RecordGraph` arena holding records and their loaded relations
//! - `RelationTree` for the processed relations of one call
//! - `RecordValidator`, `RuleValidator` and `ValidationErrorTree`

pub mod connection;
pub mod error;
pub mod model;
pub mod record;
pub mod relation;
pub mod row;
pub mod schema;
pub mod tree;
pub mod validate;
pub mod value;

pub use connection::{Connection, IsolationLevel, quote_ident};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result,
    SchemaError, SchemaErrorKind, TransactionError, TransactionErrorKind, TypeError, UsageError,
};
pub use model::ModelDef;
pub use record::{Attributes, DefaultRelationTreeProvider, Record, RecordGraph, RecordId, Related};
pub use relation::{ForeignKeySpec, KeyColumn, RelationDescriptor, RelationKind};
pub use row::{ColumnInfo, FromValue, Row};
pub use schema::{ForeignKeyInfo, SchemaProvider, TableSchema};
pub use tree::{Partition, RelationTree};
pub use validate::{
    FieldErrors, RecordValidator, RelatedErrors, Rule, RuleValidator, ValidationErrorTree,
    matches_pattern,
};
pub use value::{Value, compare_keys, key_is_complete};
