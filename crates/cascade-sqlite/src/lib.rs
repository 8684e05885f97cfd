//! SQLite driver for Cascade.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate provides a synchronous SQLite storage collaborator built on
//! `libsqlite3-sys` (bundled amalgamation). It implements the `Connection`
//! trait from cascade-core so the cascading engine can run against a real
//! database.
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_sqlite::SqliteConnection;
//! use cascade_core::{Connection, Value};
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let id = conn.insert("INSERT INTO users (name) VALUES (?)", &[Value::from("Alice")])?;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite Type |
//! |-------|-------------|
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Json` | TEXT |
//! | `Null` | NULL |
//!
//! # Thread Safety
//!
//! `SqliteConnection` is both `Send` and `Sync`, using an internal mutex to
//! protect the underlying SQLite handle.

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
