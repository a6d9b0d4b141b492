//! Execution engine.
//!
//! [`Db`] owns one [`Backend`] connection and everything that is scoped to it:
//! the transaction counter, the affected-row count of the last statement and
//! the last statement itself (for [`Db::emulated_sql`]).
//!
//! # Example
//! ```ignore
//! use stmtkit::{Db, QueryBuilder, binds};
//!
//! let mut db = Db::new(client).with_sources(registry);
//!
//! db.insert("student", binds! { "age" => 21, "name" => "mana" }).await?;
//!
//! let mut qb = QueryBuilder::select_from("orders");
//! qb.where_(("amount > :min:", binds! { "min" => 10 })).limit(5, None);
//! let rows = db.select(&qb).await?;
//! ```

use crate::backend::{Backend, BindSlot, BoundParam};
use crate::bind::{BindKey, BindMap, BindTypes};
use crate::builder::{CompiledStatement, QueryBuilder};
use crate::compiler::{NativeStatement, StatementCompiler};
use crate::config::DbConfig;
use crate::condition::Filter;
use crate::dialect::Dialect;
use crate::emulate::emulate;
use crate::log::TX_TARGET;
use crate::error::{BackendError, DbError, DbResult};
use crate::metadata::{MetadataCache, MetadataEntry};
use crate::source::{Source, SourceRegistry};
use crate::store::MetadataStore;
use crate::value::{coerce, coerce_as};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Append a literal LIMIT/OFFSET to a statement.
pub fn limit(sql: &str, number: u64, offset: Option<u64>) -> String {
    match offset {
        Some(offset) => format!("{sql} LIMIT {number} OFFSET {offset}"),
        None => format!("{sql} LIMIT {number}"),
    }
}

/// Coerce a bind map into slot-addressed wire values.
///
/// Positional keys bind to 1-based slots, named keys to `:name`.
pub fn bind_params(binds: &BindMap, types: &BindTypes) -> DbResult<Vec<BoundParam>> {
    let mut params = Vec::with_capacity(binds.len());
    for (key, value) in binds.iter() {
        let (slot, parameter) = match key {
            BindKey::Index(i) => (BindSlot::Position(i + 1), (i + 1).to_string()),
            BindKey::Name(name) => {
                if name.starts_with(':') {
                    return Err(DbError::composition(format!(
                        "bind name '{name}' must not start with ':'"
                    )));
                }
                (BindSlot::Named(format!(":{name}")), name.clone())
            }
        };
        let value = match types.get(key) {
            Some(ty) => coerce_as(&parameter, value, *ty)?,
            None => coerce(&parameter, value)?,
        };
        params.push(BoundParam::new(slot, value));
    }
    Ok(params)
}

fn is_bind_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// One connection plus its statement and transaction bookkeeping.
pub struct Db<B: Backend> {
    backend: B,
    config: DbConfig,
    compiler: StatementCompiler,
    sources: Arc<SourceRegistry>,
    metadata: Arc<MetadataCache>,
    /// Set once a cache is injected with `with_metadata`.
    shared_metadata: bool,
    transaction_level: u32,
    affected_rows: u64,
    last_sql: String,
    last_params: Vec<BoundParam>,
}

impl<B: Backend> std::fmt::Debug for Db<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("dialect", &self.dialect())
            .field("transaction_level", &self.transaction_level)
            .field("affected_rows", &self.affected_rows)
            .field("last_sql", &self.last_sql)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> Db<B> {
    /// Wrap a backend with default configuration, no registered sources and a
    /// private metadata cache.
    pub fn new(backend: B) -> Self {
        let compiler = StatementCompiler::new(backend.dialect());
        Self {
            backend,
            config: DbConfig::default(),
            compiler,
            sources: Arc::new(SourceRegistry::new()),
            metadata: Arc::new(MetadataCache::new()),
            shared_metadata: false,
            transaction_level: 0,
            affected_rows: 0,
            last_sql: String::new(),
            last_params: Vec::new(),
        }
    }

    /// Use `config` for logging and metadata keys.
    ///
    /// A private metadata cache is rebuilt with the configured key prefix,
    /// keeping its store. A cache injected with
    /// [`with_metadata`](Self::with_metadata) keeps its own prefix.
    pub fn with_config(mut self, config: DbConfig) -> Self {
        self.config = config;
        if !self.shared_metadata {
            let store = self.metadata.store().cloned();
            self.metadata = self.private_cache(store);
        }
        self
    }

    pub fn with_sources(mut self, sources: impl Into<Arc<SourceRegistry>>) -> Self {
        self.sources = sources.into();
        self
    }

    /// Share a metadata cache with other connections.
    pub fn with_metadata(mut self, metadata: Arc<MetadataCache>) -> Self {
        self.metadata = metadata;
        self.shared_metadata = true;
        self
    }

    /// Use a private metadata cache persisting through `store` under the
    /// configured key prefix.
    pub fn with_metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata = self.private_cache(Some(store));
        self.shared_metadata = false;
        self
    }

    fn private_cache(&self, store: Option<Arc<dyn MetadataStore>>) -> Arc<MetadataCache> {
        let cache = match store {
            Some(store) => MetadataCache::with_store(store),
            None => MetadataCache::new(),
        };
        Arc::new(cache.key_prefix(self.config.metadata_key_prefix.clone()))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn dialect(&self) -> Dialect {
        self.compiler.dialect()
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn metadata_cache(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    /// Quote an identifier the way this connection expects.
    pub fn escape_identifier(&self, identifier: &str) -> String {
        self.backend.escape_identifier(identifier)
    }

    // ==================== Transactions ====================

    /// Start a transaction. Fails when one is already active.
    pub async fn begin(&mut self) -> DbResult<()> {
        if self.transaction_level != 0 {
            return Err(DbError::transaction(
                "there is an active transaction already",
            ));
        }
        self.backend
            .begin_transaction()
            .await
            .map_err(|e| backend_error(e, "BEGIN"))?;
        self.transaction_level += 1;
        tracing::debug!(target: TX_TARGET, level = self.transaction_level, "begin");
        Ok(())
    }

    /// Commit the active transaction.
    pub async fn commit(&mut self) -> DbResult<()> {
        if self.transaction_level == 0 {
            return Err(DbError::transaction("there is no active transaction"));
        }
        self.backend
            .commit()
            .await
            .map_err(|e| backend_error(e, "COMMIT"))?;
        self.transaction_level -= 1;
        tracing::debug!(target: TX_TARGET, level = self.transaction_level, "commit");
        Ok(())
    }

    /// Roll back the active transaction.
    pub async fn rollback(&mut self) -> DbResult<()> {
        if self.transaction_level == 0 {
            return Err(DbError::transaction("there is no active transaction"));
        }
        self.backend
            .rollback()
            .await
            .map_err(|e| backend_error(e, "ROLLBACK"))?;
        self.transaction_level -= 1;
        tracing::debug!(target: TX_TARGET, level = self.transaction_level, "rollback");
        Ok(())
    }

    pub fn transaction_level(&self) -> u32 {
        self.transaction_level
    }

    pub fn is_under_transaction(&self) -> bool {
        self.transaction_level > 0
    }

    // ==================== Raw statements ====================

    /// Run a native statement and return its rows.
    ///
    /// `binds` use the native tokens of the backend (`:name`, `?` or `$n`).
    /// Statements without binds are sent unprepared.
    pub async fn query(&mut self, sql: &str, binds: &BindMap) -> DbResult<Vec<B::Row>> {
        self.query_typed(sql, binds, &BindTypes::new()).await
    }

    /// [`query`](Self::query) with declared wire types.
    pub async fn query_typed(
        &mut self,
        sql: &str,
        binds: &BindMap,
        types: &BindTypes,
    ) -> DbResult<Vec<B::Row>> {
        self.affected_rows = 0;
        let params = bind_params(binds, types)?;
        let start = Instant::now();

        let result = if params.is_empty() {
            self.backend.query(sql).await
        } else {
            match self.backend.prepare(sql).await {
                Ok(stmt) => self.backend.query_prepared(&stmt, &params).await,
                Err(e) => Err(e),
            }
        };

        self.last_sql = sql.to_string();
        self.last_params = params;

        let rows = result.map_err(|e| self.query_error(e))?;
        self.affected_rows = rows.len() as u64;
        self.log_statement(start);
        Ok(rows)
    }

    /// Run a native statement and return the affected-row count.
    ///
    /// A count of 0 does not distinguish "nothing matched" from "matched but
    /// already had these values" on backends that report changed rows.
    pub async fn execute(&mut self, sql: &str, binds: &BindMap) -> DbResult<u64> {
        self.execute_typed(sql, binds, &BindTypes::new()).await
    }

    /// [`execute`](Self::execute) with declared wire types.
    pub async fn execute_typed(
        &mut self,
        sql: &str,
        binds: &BindMap,
        types: &BindTypes,
    ) -> DbResult<u64> {
        self.affected_rows = 0;
        let params = bind_params(binds, types)?;
        let start = Instant::now();

        let result = if params.is_empty() {
            self.backend.execute(sql).await
        } else {
            match self.backend.prepare(sql).await {
                Ok(stmt) => self.backend.execute_prepared(&stmt, &params).await,
                Err(e) => Err(e),
            }
        };

        self.last_sql = sql.to_string();
        self.last_params = params;

        let affected = result.map_err(|e| self.query_error(e))?;
        self.affected_rows = affected;
        self.log_statement(start);
        Ok(affected)
    }

    /// First row of a native statement, if any.
    pub async fn fetch_one(&mut self, sql: &str, binds: &BindMap) -> DbResult<Option<B::Row>> {
        Ok(self.query(sql, binds).await?.into_iter().next())
    }

    /// All rows of a native statement.
    pub async fn fetch_all(&mut self, sql: &str, binds: &BindMap) -> DbResult<Vec<B::Row>> {
        self.query(sql, binds).await
    }

    // ==================== Builder statements ====================

    /// Turn an intermediate statement into native SQL, resolving its sources
    /// through the registry.
    pub fn resolve(&self, stmt: &CompiledStatement) -> DbResult<NativeStatement> {
        let mut resolved: HashMap<String, Source> = HashMap::with_capacity(stmt.sources.len());
        for name in &stmt.sources {
            let source = self.sources.require(name)?;
            resolved.insert(name.clone(), source.clone());
        }
        self.compiler.resolve(stmt, &resolved)
    }

    /// Compile and run a builder query.
    pub async fn select(&mut self, builder: &QueryBuilder) -> DbResult<Vec<B::Row>> {
        let stmt = builder.compile()?;
        let native = self.resolve(&stmt)?;
        self.query_typed(&native.sql, &native.binds, &native.types)
            .await
    }

    /// First row of a builder query.
    pub async fn select_one(&mut self, builder: &QueryBuilder) -> DbResult<Option<B::Row>> {
        Ok(self.select(builder).await?.into_iter().next())
    }

    /// Metadata of a registered source.
    pub async fn metadata(&self, source: &str) -> DbResult<Arc<MetadataEntry>> {
        let source = self.sources.require(source)?;
        self.metadata.entry(&self.backend, source).await
    }

    // ==================== Helpers ====================

    /// Insert one row and return the affected-row count.
    ///
    /// Named values produce `INSERT INTO t (a,b) VALUES (:a,:b)`; positional
    /// values produce `INSERT INTO t VALUES (?,?)`.
    pub async fn insert(&mut self, table: &str, values: BindMap) -> DbResult<u64> {
        if values.is_empty() {
            return Err(DbError::configuration(format!(
                "unable to insert into {table} without data"
            )));
        }

        let sql = if values.is_positional() {
            let slots = vec!["?"; values.len()].join(",");
            format!("INSERT INTO [{table}] VALUES ({slots})")
        } else {
            let mut columns = Vec::with_capacity(values.len());
            for key in values.keys() {
                match key {
                    BindKey::Name(name) if is_bind_name(name) => columns.push(name.as_str()),
                    other => {
                        return Err(DbError::configuration(format!(
                            "invalid column '{other}' for insert into {table}"
                        )));
                    }
                }
            }
            let names = columns
                .iter()
                .map(|c| format!("[{c}]"))
                .collect::<Vec<_>>()
                .join(",");
            let placeholders = columns
                .iter()
                .map(|c| format!(":{c}:"))
                .collect::<Vec<_>>()
                .join(",");
            format!("INSERT INTO [{table}] ({names}) VALUES ({placeholders})")
        };

        let native = self.compiler.rewrite(&sql, &values, &BindTypes::new())?;
        self.execute_typed(&native.sql, &native.binds, &native.types)
            .await
    }

    /// Update rows matching `filter` and return the affected-row count.
    ///
    /// SET values bind under their column names, so they must not collide with
    /// a parameter of the filter. See [`execute`](Self::execute) for the meaning
    /// of a 0 count.
    pub async fn update(
        &mut self,
        table: &str,
        values: BindMap,
        filter: impl Into<Filter>,
    ) -> DbResult<u64> {
        if values.is_empty() {
            return Err(DbError::configuration(format!(
                "unable to update {table} without data"
            )));
        }
        let filter = filter.into();
        if filter.is_empty() {
            return Err(DbError::configuration(format!(
                "unable to update {table} without conditions"
            )));
        }

        let mut sets = Vec::with_capacity(values.len());
        for key in values.keys() {
            let name = match key {
                BindKey::Name(name) if is_bind_name(name) => name,
                other => {
                    return Err(DbError::configuration(format!(
                        "invalid column '{other}' for update of {table}"
                    )));
                }
            };
            if filter.binds().contains(name) {
                return Err(DbError::configuration(format!(
                    "column '{name}' collides with a filter parameter"
                )));
            }
            sets.push(format!("[{name}]=:{name}:"));
        }

        let (where_sql, mut binds, types) = filter.into_parts();
        let sql = format!("UPDATE [{table}] SET {} WHERE {where_sql}", sets.join(","));
        binds.merge(values);

        let native = self.compiler.rewrite(&sql, &binds, &types)?;
        self.execute_typed(&native.sql, &native.binds, &native.types)
            .await
    }

    /// Delete rows matching `filter` and return the affected-row count.
    pub async fn delete(&mut self, table: &str, filter: impl Into<Filter>) -> DbResult<u64> {
        let filter = filter.into();
        if filter.is_empty() {
            return Err(DbError::configuration(format!(
                "unable to delete from {table} without conditions"
            )));
        }

        let (where_sql, binds, types) = filter.into_parts();
        let sql = format!("DELETE FROM [{table}] WHERE {where_sql}");
        let native = self.compiler.rewrite(&sql, &binds, &types)?;
        self.execute_typed(&native.sql, &native.binds, &native.types)
            .await
    }

    // ==================== Bookkeeping ====================

    /// Id generated by the most recent insert.
    pub async fn last_insert_id(&self) -> DbResult<i64> {
        self.backend
            .last_insert_id()
            .await
            .map_err(|e| backend_error(e, "last insert id"))
    }

    /// Rows affected (or returned) by the last statement; 0 when it failed.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// The last statement as sent to the backend.
    pub fn last_sql(&self) -> &str {
        &self.last_sql
    }

    /// The coerced values bound to the last statement.
    pub fn last_binds(&self) -> &[BoundParam] {
        &self.last_params
    }

    /// The last statement with its bound values inlined.
    ///
    /// String values of `max_preserved` or more characters are truncated.
    pub fn emulated_sql(&self, max_preserved: Option<usize>) -> String {
        emulate(
            &self.last_sql,
            &self.last_params,
            self.dialect(),
            max_preserved,
        )
    }

    fn query_error(&self, err: BackendError) -> DbError {
        DbError::Query {
            message: err.message,
            code: err.code,
            sql: self.emulated_sql(self.config.log.preserved_string_length),
        }
    }

    fn log_statement(&self, start: Instant) {
        let log = &self.config.log;
        if !log.enabled() {
            return;
        }
        let sql = self.emulated_sql(log.preserved_string_length);
        log.statement(
            &sql,
            self.last_params.len(),
            start.elapsed(),
            self.affected_rows,
        );
    }
}

fn backend_error(err: BackendError, what: &str) -> DbError {
    DbError::Query {
        message: err.message,
        code: err.code,
        sql: what.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binds;
    use crate::value::{WireType, WireValue};

    #[test]
    fn binds_positional_and_named_slots() {
        let params = bind_params(&BindMap::positional(["a", "b"]), &BindTypes::new()).unwrap();
        assert_eq!(params[0].slot, BindSlot::Position(1));
        assert_eq!(params[1].slot, BindSlot::Position(2));

        let params = bind_params(&binds! { "age" => 21 }, &BindTypes::new()).unwrap();
        assert_eq!(params[0].slot, BindSlot::Named(":age".to_string()));
        assert_eq!(params[0].value, WireValue::Int(21));
    }

    #[test]
    fn colon_prefixed_name_is_rejected() {
        let err = bind_params(&binds! { ":age" => 21 }, &BindTypes::new()).unwrap_err();
        assert!(err.is_composition());
    }

    #[test]
    fn declared_types_are_applied() {
        let mut types = BindTypes::new();
        types.insert(BindKey::name("limit"), WireType::Int);
        let params = bind_params(&binds! { "limit" => "5" }, &types).unwrap();
        assert_eq!(params[0].value, WireValue::Int(5));
    }

    #[test]
    fn float_is_rejected_before_execution() {
        let err = bind_params(&binds! { "price" => 9.5 }, &BindTypes::new()).unwrap_err();
        assert!(matches!(err, DbError::UnsupportedBindType { .. }));
    }

    #[test]
    fn literal_limit() {
        assert_eq!(limit("SELECT * FROM t", 5, None), "SELECT * FROM t LIMIT 5");
        assert_eq!(
            limit("SELECT * FROM t", 5, Some(10)),
            "SELECT * FROM t LIMIT 5 OFFSET 10"
        );
    }
}
