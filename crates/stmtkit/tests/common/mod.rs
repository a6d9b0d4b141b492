//! In-memory backend recording every call it receives.

#![allow(dead_code)]

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use stmtkit::{
    Backend, BackendError, BoundParam, ColumnDescription, DbResult, Dialect, MetadataSource,
    Source,
};

/// One call made by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Prepare(String),
    QueryPrepared(String, Vec<BoundParam>),
    ExecutePrepared(String, Vec<BoundParam>),
    Query(String),
    Execute(String),
    Begin,
    Commit,
    Rollback,
    Describe(String),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    rows: VecDeque<Vec<Value>>,
    affected: VecDeque<u64>,
    failure: Option<BackendError>,
}

pub struct MockBackend {
    dialect: Dialect,
    state: Mutex<State>,
    columns: HashMap<String, Vec<ColumnDescription>>,
    insert_id: i64,
}

impl MockBackend {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: Mutex::new(State::default()),
            columns: HashMap::new(),
            insert_id: 0,
        }
    }

    pub fn mysql() -> Self {
        Self::new(Dialect::MySql)
    }

    pub fn postgres() -> Self {
        Self::new(Dialect::Postgres)
    }

    /// Queue the rows of the next query.
    pub fn with_rows(self, rows: Vec<Value>) -> Self {
        self.state.lock().unwrap().rows.push_back(rows);
        self
    }

    /// Queue the affected-row count of the next execute (default 1).
    pub fn with_affected(self, affected: u64) -> Self {
        self.state.lock().unwrap().affected.push_back(affected);
        self
    }

    pub fn with_columns(mut self, table: &str, columns: Vec<ColumnDescription>) -> Self {
        self.columns.insert(table.to_string(), columns);
        self
    }

    pub fn with_insert_id(mut self, id: i64) -> Self {
        self.insert_id = id;
        self
    }

    /// Make the next statement fail.
    pub fn fail_next(&self, error: BackendError) {
        self.state.lock().unwrap().failure = Some(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls other than `Prepare` and `Describe`.
    pub fn statements(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Prepare(_) | Call::Describe(_)))
            .collect()
    }

    fn record(&self, call: Call) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_rows(&self) -> Vec<Value> {
        self.state.lock().unwrap().rows.pop_front().unwrap_or_default()
    }

    fn next_affected(&self) -> u64 {
        self.state.lock().unwrap().affected.pop_front().unwrap_or(1)
    }
}

impl MetadataSource for MockBackend {
    async fn describe(&self, source: &Source) -> DbResult<Vec<ColumnDescription>> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::Describe(source.table_name().to_string()));
        Ok(self
            .columns
            .get(source.table_name())
            .cloned()
            .unwrap_or_default())
    }
}

impl Backend for MockBackend {
    type Row = Value;
    type Statement = String;

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn prepare(&self, sql: &str) -> Result<String, BackendError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::Prepare(sql.to_string()));
        Ok(sql.to_string())
    }

    async fn query_prepared(
        &self,
        stmt: &String,
        params: &[BoundParam],
    ) -> Result<Vec<Value>, BackendError> {
        self.record(Call::QueryPrepared(stmt.clone(), params.to_vec()))?;
        Ok(self.next_rows())
    }

    async fn execute_prepared(
        &self,
        stmt: &String,
        params: &[BoundParam],
    ) -> Result<u64, BackendError> {
        self.record(Call::ExecutePrepared(stmt.clone(), params.to_vec()))?;
        Ok(self.next_affected())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Value>, BackendError> {
        self.record(Call::Query(sql.to_string()))?;
        Ok(self.next_rows())
    }

    async fn execute(&self, sql: &str) -> Result<u64, BackendError> {
        self.record(Call::Execute(sql.to_string()))?;
        Ok(self.next_affected())
    }

    async fn begin_transaction(&self) -> Result<(), BackendError> {
        self.record(Call::Begin)
    }

    async fn commit(&self) -> Result<(), BackendError> {
        self.record(Call::Commit)
    }

    async fn rollback(&self) -> Result<(), BackendError> {
        self.record(Call::Rollback)
    }

    async fn last_insert_id(&self) -> Result<i64, BackendError> {
        Ok(self.insert_id)
    }
}
