//! Backend connection contract.
//!
//! A [`Backend`] is one connection to a relational database. The
//! [`Db`](crate::db::Db) engine drives it with native SQL and coerced
//! [`BoundParam`]s; the backend never sees the intermediate notation.

use crate::dialect::Dialect;
use crate::error::BackendError;
use crate::metadata::MetadataSource;
use crate::value::WireValue;
use std::fmt;
use std::future::Future;

/// Where a bound value goes in a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindSlot {
    /// 1-based position.
    Position(usize),
    /// Name including its `:` prefix.
    Named(String),
}

impl fmt::Display for BindSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindSlot::Position(p) => write!(f, "{p}"),
            BindSlot::Named(n) => f.write_str(n),
        }
    }
}

/// A value bound to a prepared statement slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundParam {
    pub slot: BindSlot,
    pub value: WireValue,
}

impl BoundParam {
    pub fn new(slot: BindSlot, value: WireValue) -> Self {
        Self { slot, value }
    }
}

/// One database connection.
///
/// Implementations report failures as [`BackendError`]; the engine attaches the
/// statement text and turns them into [`DbError::Query`](crate::DbError::Query).
pub trait Backend: MetadataSource + Send + Sync {
    /// Row type returned by queries.
    type Row: Send;
    /// Prepared statement handle.
    type Statement: Send + Sync;

    /// Identifier quoting and placeholder style of this connection.
    fn dialect(&self) -> Dialect;

    /// Quote a (possibly dotted) identifier.
    fn escape_identifier(&self, identifier: &str) -> String {
        self.dialect().escape_identifier(identifier)
    }

    /// Prepare a statement on this connection.
    fn prepare(
        &self,
        sql: &str,
    ) -> impl Future<Output = Result<Self::Statement, BackendError>> + Send;

    /// Run a prepared statement and return its rows.
    fn query_prepared(
        &self,
        stmt: &Self::Statement,
        params: &[BoundParam],
    ) -> impl Future<Output = Result<Vec<Self::Row>, BackendError>> + Send;

    /// Run a prepared statement and return the affected-row count.
    fn execute_prepared(
        &self,
        stmt: &Self::Statement,
        params: &[BoundParam],
    ) -> impl Future<Output = Result<u64, BackendError>> + Send;

    /// Run a statement without parameters and return its rows.
    fn query(&self, sql: &str)
    -> impl Future<Output = Result<Vec<Self::Row>, BackendError>> + Send;

    /// Run a statement without parameters and return the affected-row count.
    fn execute(&self, sql: &str) -> impl Future<Output = Result<u64, BackendError>> + Send;

    fn begin_transaction(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn commit(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn rollback(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Id generated by the most recent insert on this connection.
    fn last_insert_id(&self) -> impl Future<Output = Result<i64, BackendError>> + Send;
}
