//! Storage collaborator traits.
//!
//! The cascading engine never talks to a database directly. It issues
//! parameterized statements through [`Connection`] and drives the single
//! ambient transaction through its begin/commit/rollback primitives.
//!
//! Execution is synchronous: every call blocks until the storage engine has
//! answered. Drivers that wrap a non-thread-safe handle serialize access
//! internally so that the trait can be `Send + Sync`.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted: transactions can see uncommitted changes from others.
    ReadUncommitted,
    /// Read committed: transactions only see committed changes from others.
    #[default]
    ReadCommitted,
    /// Repeatable read: transactions see a consistent snapshot.
    RepeatableRead,
    /// Serializable: transactions appear to execute sequentially.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A database connection capable of executing statements.
///
/// Statements use `?` placeholders and double-quoted identifiers.
///
/// # Example
///
/// ```rust,ignore
/// let rows = conn.query("SELECT * FROM \"users\" WHERE \"id\" = ?", &[Value::BigInt(1)])?;
///
/// conn.begin()?;
/// conn.execute("INSERT INTO \"logs\" (\"msg\") VALUES (?)", &[Value::Text("action".into())])?;
/// conn.commit()?;
/// ```
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return the first row, if any.
    fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute an INSERT and return the last inserted ID.
    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Begin a transaction with default isolation level (ReadCommitted).
    fn begin(&self) -> Result<()> {
        self.begin_with(IsolationLevel::default())
    }

    /// Begin a transaction with a specific isolation level.
    fn begin_with(&self, isolation: IsolationLevel) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback(&self) -> Result<()>;

    /// Whether a transaction is currently open on this connection.
    fn in_transaction(&self) -> bool;
}

impl<C: Connection + ?Sized> Connection for &C {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        (**self).query_one(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        (**self).insert(sql, params)
    }

    fn begin_with(&self, isolation: IsolationLevel) -> Result<()> {
        (**self).begin_with(isolation)
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<()> {
        (**self).rollback()
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }
}

/// Quote an identifier with double quotes, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_default() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("post_tag"), "\"post_tag\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
