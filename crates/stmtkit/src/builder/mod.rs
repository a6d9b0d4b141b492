//! Structured SELECT builder.
//!
//! [`QueryBuilder`] accumulates clause state and compiles it into a
//! [`CompiledStatement`] written in the intermediate notation: `[name]` for
//! identifiers and logical sources, `:name:` for bound parameters. The
//! statement is turned into native SQL by the
//! [`StatementCompiler`](crate::compiler::StatementCompiler) once the logical
//! sources have been resolved.
//!
//! # Example
//! ```ignore
//! use stmtkit::{QueryBuilder, binds};
//!
//! let mut qb = QueryBuilder::new();
//! qb.from("orders")
//!     .where_(("amount > :min:", binds! { "min" => 10 }))
//!     .order_by(&["created DESC"])
//!     .limit(5, None);
//!
//! let stmt = qb.compile()?;
//! assert_eq!(
//!     stmt.sql,
//!     "SELECT [orders].* FROM [orders] WHERE amount > :min: ORDER BY [created] DESC LIMIT :ABP_LIMIT:"
//! );
//! ```

use crate::backend::Backend;
use crate::bind::{BindKey, BindMap, BindTypes, merge_types};
use crate::condition::{Condition, Filter};
use crate::db::Db;
use crate::error::{DbError, DbResult};
use crate::value::WireType;
use serde_json::Value;

/// Bind key of the LIMIT value.
pub const LIMIT_KEY: &str = "ABP_LIMIT";
/// Bind key of the OFFSET value.
pub const OFFSET_KEY: &str = "ABP_OFFSET";

/// JOIN flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
        }
    }
}

#[derive(Debug, Clone)]
struct Column {
    expr: String,
    alias: Option<String>,
}

#[derive(Debug, Clone)]
struct FromSource {
    source: String,
    alias: Option<String>,
}

#[derive(Debug, Clone)]
struct Join {
    source: String,
    condition: Option<String>,
    alias: Option<String>,
    kind: Option<JoinKind>,
}

#[derive(Debug, Clone)]
enum ItemList {
    Items(Vec<String>),
    Raw(String),
}

/// A statement in the intermediate notation, ready for source resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub sql: String,
    pub binds: BindMap,
    pub types: BindTypes,
    /// Logical source names referenced by FROM and JOIN, without duplicates.
    pub sources: Vec<String>,
}

/// Sources written with brackets are raw SQL and are never resolved.
fn is_raw(source: &str) -> bool {
    source.contains('[')
}

/// `name`, `name ASC` or `name DESC` with a plain word as name.
fn bare_item(item: &str) -> Option<(&str, Option<&str>)> {
    let mut parts = item.split_whitespace();
    let name = parts.next()?;
    let direction = parts.next();
    if parts.next().is_some() {
        return None;
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    match direction {
        None => Some((name, None)),
        Some(d) if d.eq_ignore_ascii_case("ASC") || d.eq_ignore_ascii_case("DESC") => {
            Some((name, Some(d)))
        }
        Some(_) => None,
    }
}

fn render_items(list: &ItemList) -> String {
    match list {
        ItemList::Raw(raw) => raw.clone(),
        ItemList::Items(items) => items
            .iter()
            .map(|item| match bare_item(item) {
                Some((name, Some(dir))) => format!("[{name}] {}", dir.to_ascii_uppercase()),
                Some((name, None)) => format!("[{name}]"),
                None => item.trim().to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Structured SELECT query builder.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    /// `None`: plain SELECT, `Some(true)`: DISTINCT, `Some(false)`: ALL
    distinct: Option<bool>,
    columns: Vec<Column>,
    sources: Vec<FromSource>,
    joins: Vec<Join>,
    filter: Filter,
    group: Option<ItemList>,
    having: Option<Condition>,
    order: Option<ItemList>,
    limit: Option<u64>,
    offset: Option<u64>,
    for_update: bool,
    shared_lock: bool,
    binds: BindMap,
    types: BindTypes,
}

impl QueryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder selecting from one logical source.
    pub fn select_from(source: &str) -> Self {
        let mut qb = Self::new();
        qb.from(source);
        qb
    }

    // ==================== Projection ====================

    /// `Some(true)` emits `SELECT DISTINCT`, `Some(false)` emits `SELECT ALL`.
    pub fn distinct(&mut self, distinct: Option<bool>) -> &mut Self {
        self.distinct = distinct;
        self
    }

    /// Replace the column list. Entries pass through verbatim.
    pub fn columns(&mut self, columns: &[&str]) -> &mut Self {
        self.columns = columns
            .iter()
            .map(|c| Column {
                expr: c.to_string(),
                alias: None,
            })
            .collect();
        self
    }

    /// Append one column.
    pub fn column(&mut self, expr: &str) -> &mut Self {
        self.columns.push(Column {
            expr: expr.to_string(),
            alias: None,
        });
        self
    }

    /// Append an aliased column: `expr AS [alias]`.
    pub fn column_as(&mut self, expr: &str, alias: &str) -> &mut Self {
        self.columns.push(Column {
            expr: expr.to_string(),
            alias: Some(alias.to_string()),
        });
        self
    }

    // ==================== Sources ====================

    /// Add a logical source.
    pub fn from(&mut self, source: &str) -> &mut Self {
        self.sources.push(FromSource {
            source: source.to_string(),
            alias: None,
        });
        self
    }

    /// Replace every source with `source`, optionally aliased.
    pub fn set_from(&mut self, source: &str, alias: Option<&str>) -> &mut Self {
        self.sources.clear();
        match alias {
            Some(alias) => self.from_as(source, alias),
            None => self.from(source),
        }
    }

    /// Add an aliased logical source. Re-adding an alias replaces that entry.
    pub fn from_as(&mut self, source: &str, alias: &str) -> &mut Self {
        let entry = FromSource {
            source: source.to_string(),
            alias: Some(alias.to_string()),
        };
        match self
            .sources
            .iter_mut()
            .find(|s| s.alias.as_deref() == Some(alias))
        {
            Some(existing) => *existing = entry,
            None => self.sources.push(entry),
        }
        self
    }

    /// Add a JOIN. A `None` kind emits a bare `JOIN`.
    pub fn join(
        &mut self,
        source: &str,
        condition: Option<&str>,
        alias: Option<&str>,
        kind: Option<JoinKind>,
    ) -> &mut Self {
        self.joins.push(Join {
            source: source.to_string(),
            condition: condition.filter(|c| !c.is_empty()).map(str::to_string),
            alias: alias.filter(|a| !a.is_empty()).map(str::to_string),
            kind,
        });
        self
    }

    pub fn inner_join(&mut self, source: &str, condition: &str, alias: Option<&str>) -> &mut Self {
        self.join(source, Some(condition), alias, Some(JoinKind::Inner))
    }

    pub fn left_join(&mut self, source: &str, condition: &str, alias: Option<&str>) -> &mut Self {
        self.join(source, Some(condition), alias, Some(JoinKind::Left))
    }

    pub fn right_join(&mut self, source: &str, condition: &str, alias: Option<&str>) -> &mut Self {
        self.join(source, Some(condition), alias, Some(JoinKind::Right))
    }

    // ==================== Filter ====================

    /// Replace the WHERE expression (bound values are merged).
    pub fn where_(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.filter.set(condition);
        self
    }

    /// `(<current>) AND (<condition>)`
    pub fn and_where(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.filter.and(condition);
        self
    }

    /// `(<current>) OR (<condition>)`
    pub fn or_where(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.filter.or(condition);
        self
    }

    pub fn between_where(
        &mut self,
        field: &str,
        min: impl Into<Value>,
        max: impl Into<Value>,
    ) -> &mut Self {
        self.filter.between(field, min, max);
        self
    }

    pub fn not_between_where(
        &mut self,
        field: &str,
        min: impl Into<Value>,
        max: impl Into<Value>,
    ) -> &mut Self {
        self.filter.not_between(field, min, max);
        self
    }

    /// `field IN (...)`; an empty list matches nothing.
    pub fn in_where<I, V>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filter.in_list(field, values);
        self
    }

    /// `field NOT IN (...)`; an empty list matches nothing.
    pub fn not_in_where<I, V>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filter.not_in(field, values);
        self
    }

    /// The accumulated filter.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    // ==================== Grouping / ordering ====================

    /// GROUP BY a list of items. Bare names are bracketed.
    pub fn group_by(&mut self, items: &[&str]) -> &mut Self {
        self.group = Some(ItemList::Items(items.iter().map(|s| s.to_string()).collect()));
        self
    }

    /// GROUP BY a verbatim clause.
    pub fn group_by_raw(&mut self, clause: &str) -> &mut Self {
        self.group = Some(ItemList::Raw(clause.to_string()));
        self
    }

    pub fn having(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.having = Some(condition.into());
        self
    }

    /// ORDER BY a list of items. Bare names (with optional ASC/DESC) are
    /// bracketed; dotted names and expressions pass through.
    pub fn order_by(&mut self, items: &[&str]) -> &mut Self {
        self.order = Some(ItemList::Items(items.iter().map(|s| s.to_string()).collect()));
        self
    }

    /// ORDER BY a verbatim clause.
    pub fn order_by_raw(&mut self, clause: &str) -> &mut Self {
        self.order = Some(ItemList::Raw(clause.to_string()));
        self
    }

    // ==================== Paging / locking ====================

    /// Set LIMIT and optionally OFFSET.
    pub fn limit(&mut self, limit: u64, offset: Option<u64>) -> &mut Self {
        self.limit = Some(limit);
        if offset.is_some() {
            self.offset = offset;
        }
        self
    }

    /// Set OFFSET. Compiling fails unless a limit is also set.
    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn for_update(&mut self, enabled: bool) -> &mut Self {
        self.for_update = enabled;
        self
    }

    pub fn shared_lock(&mut self, enabled: bool) -> &mut Self {
        self.shared_lock = enabled;
        self
    }

    // ==================== Binds ====================

    /// Bind a named value used by a raw fragment.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.binds.insert(name, value);
        self
    }

    /// Merge a bind map (last write wins).
    pub fn binds(&mut self, binds: BindMap) -> &mut Self {
        self.binds.merge(binds);
        self
    }

    /// Replace the builder's own binds. Filter and HAVING binds are kept.
    pub fn set_binds(&mut self, binds: BindMap) -> &mut Self {
        self.binds = binds;
        self
    }

    /// Declare the wire type of a named parameter.
    pub fn bind_type(&mut self, name: impl Into<String>, ty: WireType) -> &mut Self {
        self.types.insert(BindKey::Name(name.into()), ty);
        self
    }

    // ==================== Compile ====================

    /// Compile the clause state into the intermediate statement.
    ///
    /// Pure with respect to the builder: calling it twice yields the same
    /// statement.
    pub fn compile(&self) -> DbResult<CompiledStatement> {
        if self.sources.is_empty() {
            return Err(DbError::configuration(
                "at least one source is required to build the query",
            ));
        }
        if self.for_update && self.shared_lock {
            return Err(DbError::configuration(
                "FOR UPDATE and shared lock cannot be combined",
            ));
        }
        if self.offset.is_some() && self.limit.is_none() {
            return Err(DbError::configuration("offset is invalid: limit is missing"));
        }

        let mut sql = String::from("SELECT ");
        match self.distinct {
            Some(true) => sql.push_str("DISTINCT "),
            Some(false) => sql.push_str("ALL "),
            None => {}
        }

        sql.push_str(&self.render_columns());
        sql.push_str(" FROM ");
        sql.push_str(&self.render_sources());

        for join in &self.joins {
            sql.push(' ');
            if let Some(kind) = join.kind {
                sql.push_str(kind.as_str());
                sql.push(' ');
            }
            sql.push_str("JOIN ");
            if is_raw(&join.source) {
                sql.push_str(&join.source);
            } else {
                sql.push_str(&format!("[{}]", join.source));
            }
            if let Some(alias) = &join.alias {
                sql.push_str(&format!(" AS [{alias}]"));
            }
            if let Some(condition) = &join.condition {
                sql.push_str(" ON ");
                sql.push_str(condition);
            }
        }

        if !self.filter.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(self.filter.expr());
        }

        if let Some(group) = &self.group {
            sql.push_str(" GROUP BY ");
            sql.push_str(&render_items(group));
        }

        if let Some(having) = self.having.as_ref().filter(|h| !h.expr.is_empty()) {
            sql.push_str(" HAVING ");
            sql.push_str(&having.expr);
        }

        if let Some(order) = &self.order {
            sql.push_str(" ORDER BY ");
            sql.push_str(&render_items(order));
        }

        let mut binds = self.filter.binds().clone();
        let mut types = self.filter.types().clone();
        if let Some(having) = &self.having {
            binds.merge(having.binds.clone());
            merge_types(&mut types, having.types.clone());
        }
        binds.merge(self.binds.clone());
        merge_types(&mut types, self.types.clone());

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT :{LIMIT_KEY}:"));
            binds.insert(LIMIT_KEY, limit);
            types.insert(BindKey::name(LIMIT_KEY), WireType::Int);
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET :{OFFSET_KEY}:"));
            binds.insert(OFFSET_KEY, offset);
            types.insert(BindKey::name(OFFSET_KEY), WireType::Int);
        }

        if self.for_update {
            sql.push_str(" FOR UPDATE");
        } else if self.shared_lock {
            sql.push_str(" FOR SHARE");
        }

        Ok(CompiledStatement {
            sql,
            binds,
            types,
            sources: self.logical_sources(),
        })
    }

    fn render_columns(&self) -> String {
        if self.columns.is_empty() {
            return self
                .sources
                .iter()
                .map(|s| match (&s.alias, is_raw(&s.source)) {
                    (Some(alias), _) => format!("[{alias}].*"),
                    (None, true) => "*".to_string(),
                    (None, false) => format!("[{}].*", s.source),
                })
                .collect::<Vec<_>>()
                .join(", ");
        }

        self.columns
            .iter()
            .map(|c| match &c.alias {
                Some(alias) if alias.contains('[') => format!("{} AS {alias}", c.expr),
                Some(alias) => format!("{} AS [{alias}]", c.expr),
                None => c.expr.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render_sources(&self) -> String {
        self.sources
            .iter()
            .map(|s| {
                let source = if is_raw(&s.source) {
                    s.source.clone()
                } else {
                    format!("[{}]", s.source)
                };
                match &s.alias {
                    Some(alias) => format!("{source} AS [{alias}]"),
                    None => source,
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn logical_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let all = self
            .sources
            .iter()
            .map(|s| s.source.as_str())
            .chain(self.joins.iter().map(|j| j.source.as_str()));
        for name in all {
            if !is_raw(name) && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    // ==================== Execute ====================

    /// Compile and fetch all rows through `db`.
    pub async fn fetch_all<B: Backend>(&self, db: &mut Db<B>) -> DbResult<Vec<B::Row>> {
        db.select(self).await
    }

    /// Compile and fetch the first row through `db`.
    pub async fn fetch_one<B: Backend>(&self, db: &mut Db<B>) -> DbResult<Option<B::Row>> {
        db.select_one(self).await
    }
}

#[cfg(test)]
mod tests;
