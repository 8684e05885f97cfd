//! Schema metadata providers for Cascade.
//!
//! The cascading engine asks a [`SchemaProvider`](cascade_core::SchemaProvider)
//! for table names, columns, primary keys and declared foreign keys. This crate
//! supplies two implementations:
//!
//! - [`StaticSchema`]: tables declared in code with the `TableSchema` builder
//! - [`IntrospectedSchema`]: tables read lazily from a SQLite database and cached

pub mod introspect;
pub mod static_schema;

pub use introspect::{IntrospectedSchema, Introspector};
pub use static_schema::StaticSchema;
