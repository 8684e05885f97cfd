//! Error types for Cascade operations.
//!
//! The taxonomy follows the failure classes of a cascading save:
//!
//! - configuration errors (bad relation or junction specifications),
//! - usage errors (misuse of the junction overlay or link API),
//! - storage errors (anything the storage collaborator reports),
//! - schema and type errors raised while reading metadata and rows.
//!
//! Validation failures are not errors: they are reported through
//! [`ValidationErrorTree`](crate::validate::ValidationErrorTree) and a `false`
//! return from `save`.

use std::fmt;

/// The primary error type for all Cascade operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, lost connection)
    Connection(ConnectionError),
    /// Statement execution errors reported by the storage collaborator
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction primitive errors
    Transaction(TransactionError),
    /// Schema metadata errors
    Schema(SchemaError),
    /// Relation or junction configuration errors
    Config(ConfigError),
    /// Misuse of the engine API
    Usage(UsageError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, check, not null)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Database busy or locked
    Busy,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// A transaction is already open on the connection
    AlreadyActive,
    /// Commit or rollback without an open transaction
    NotActive,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Table not found
    TableNotFound,
    /// Column not found
    ColumnNotFound,
    /// Metadata could not be read
    Introspection,
}

/// A relation, key map or junction specification cannot be resolved.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    /// Relation the error was raised for, when known.
    pub relation: Option<String>,
}

/// The engine API was called with arguments that do not fit the graph.
#[derive(Debug)]
pub struct UsageError {
    pub message: String,
    /// Relation the error was raised for, when known.
    pub relation: Option<String>,
}

impl Error {
    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            relation: None,
        })
    }

    /// Build a configuration error scoped to a relation.
    pub fn relation_config(relation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            relation: Some(relation.into()),
        })
    }

    /// Build a usage error scoped to a relation.
    pub fn usage(relation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Usage(UsageError {
            message: message.into(),
            relation: Some(relation.into()),
        })
    }

    /// Build a "table not found" schema error.
    pub fn table_not_found(table: &str) -> Self {
        Error::Schema(SchemaError {
            kind: SchemaErrorKind::TableNotFound,
            message: format!("table '{}' is not known to the schema provider", table),
        })
    }

    /// Is this a failure reported by the storage collaborator?
    ///
    /// These are the errors that make the outermost save roll back and
    /// re-raise unchanged.
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Error::Query(_) | Error::Connection(_) | Error::Transaction(_)
        )
    }

    /// Is this a configuration error?
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Is this a usage error?
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Error::Usage(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl QueryError {
    /// Is this a constraint violation?
    pub fn is_constraint_violation(&self) -> bool {
        self.kind == QueryErrorKind::Constraint
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Usage(e) => write!(f, "Usage error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sql) = &self.sql {
            write!(f, "{} (while executing `{}`)", self.message, sql)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "relation '{}': {}", relation, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "relation '{}': {}", relation, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

/// Result type alias for Cascade operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_family_classification() {
        let query = Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("INSERT INTO t VALUES (1)".to_string()),
            message: "CHECK constraint failed".to_string(),
            source: None,
        });
        assert!(query.is_storage_error());
        assert_eq!(query.sql(), Some("INSERT INTO t VALUES (1)"));

        let tx = Error::Transaction(TransactionError {
            kind: TransactionErrorKind::NotActive,
            message: "Not in a transaction".to_string(),
        });
        assert!(tx.is_storage_error());

        assert!(!Error::config("bad spec").is_storage_error());
        assert!(Error::config("bad spec").is_config_error());
        assert!(Error::usage("tags", "not related").is_usage_error());
    }

    #[test]
    fn display_includes_relation_name() {
        let err = Error::relation_config("tags", "join table 'post_tag' does not exist");
        assert_eq!(
            err.to_string(),
            "Configuration error: relation 'tags': join table 'post_tag' does not exist"
        );

        let err = Error::usage("author", "relation is not a many-many relation");
        assert_eq!(
            err.to_string(),
            "Usage error: relation 'author': relation is not a many-many relation"
        );
    }

    #[test]
    fn constraint_violation_flag() {
        let q = QueryError {
            kind: QueryErrorKind::Constraint,
            sql: None,
            message: "UNIQUE constraint failed".to_string(),
            source: None,
        };
        assert!(q.is_constraint_violation());
        assert_eq!(q.to_string(), "UNIQUE constraint failed");
    }
}
