//! Error types for stmtkit

use thiserror::Error;

/// Result type alias for stmtkit operations
pub type DbResult<T> = Result<T, DbError>;

/// Error types for building, compiling and executing statements
#[derive(Debug, Error)]
pub enum DbError {
    /// Builder or helper misconfiguration (offset without limit, empty insert, unknown source)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The intermediate statement could not be turned into native SQL
    #[error("Composition error: {0}")]
    Composition(String),

    /// A bound value has a type the wire protocol cannot carry
    #[error("The type of parameter '{parameter}' is not supported: {type_name}")]
    UnsupportedBindType { parameter: String, type_name: String },

    /// Transaction state violation (begin while active, commit/rollback while idle)
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Backend execution failure.
    ///
    /// `sql` is the emulated statement (bound values inlined) for diagnosis.
    #[error("Query error: {message}: {sql}")]
    Query {
        message: String,
        code: Option<String>,
        sql: String,
    },

    /// Connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// Metadata store read/write failure
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a composition error
    pub fn composition(message: impl Into<String>) -> Self {
        Self::Composition(message.into())
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction(message.into())
    }

    /// Create an unsupported bind type error
    pub fn unsupported_bind_type(parameter: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::UnsupportedBindType {
            parameter: parameter.into(),
            type_name: type_name.into(),
        }
    }

    /// Check if this is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Check if this is a composition error
    pub fn is_composition(&self) -> bool {
        matches!(self, Self::Composition(_))
    }

    /// Check if this is a transaction error
    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }

    /// Check if this is a unique violation reported by the backend.
    ///
    /// Recognizes SQLSTATE `23505` (PostgreSQL) and error `1062` (MySQL).
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::Query { code: Some(code), .. } if code == "23505" || code == "1062"
        )
    }

    /// The statement text attached to a query error, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

/// Error reported by a [`Backend`](crate::backend::Backend) implementation.
///
/// The engine wraps it into [`DbError::Query`] together with the statement text.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    /// Backend specific error code (SQLSTATE for PostgreSQL).
    pub code: Option<String>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
