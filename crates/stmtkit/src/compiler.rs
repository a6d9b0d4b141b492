//! Intermediate notation to native SQL.
//!
//! The [`StatementCompiler`] performs three rewrites in a single left-to-right
//! scan of the statement:
//!
//! - `[name]` naming a resolved logical source becomes the escaped,
//!   schema-qualified physical table;
//! - any other `[name]` becomes an escaped identifier;
//! - `:name:` becomes the backend's bind token (`:name` or `$n`).
//!
//! String literals and identifiers that are already quoted are copied
//! untouched. A `::` cast is never mistaken for a placeholder.

use crate::bind::{BindKey, BindMap, BindTypes};
use crate::builder::CompiledStatement;
use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::source::Source;
use std::collections::HashMap;

/// A statement in the backend's own syntax.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeStatement {
    pub sql: String,
    /// Keyed by native token: `Name(n)` for `:n`, `Index(i)` for positional slots.
    pub binds: BindMap,
    pub types: BindTypes,
}

/// Rewrites intermediate statements for one dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatementCompiler {
    dialect: Dialect,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl StatementCompiler {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Escaped, schema-qualified table reference of a source.
    pub fn table_reference(&self, source: &Source) -> String {
        let mut out = String::new();
        if let Some(schema) = source.schema_name() {
            self.dialect.write_identifier(schema, &mut out);
            out.push('.');
        }
        self.dialect.write_identifier(source.table_name(), &mut out);
        out
    }

    /// Resolve logical sources and rewrite the statement.
    ///
    /// Every source the statement references must be present in `sources`.
    pub fn resolve(
        &self,
        stmt: &CompiledStatement,
        sources: &HashMap<String, Source>,
    ) -> DbResult<NativeStatement> {
        if let Some(missing) = stmt.sources.iter().find(|s| !sources.contains_key(*s)) {
            return Err(DbError::composition(format!(
                "source '{missing}' was not resolved"
            )));
        }
        self.translate(&stmt.sql, Some(sources), &stmt.binds, &stmt.types)
    }

    /// Rewrite brackets and placeholders without resolving sources.
    pub fn rewrite(
        &self,
        sql: &str,
        binds: &BindMap,
        types: &BindTypes,
    ) -> DbResult<NativeStatement> {
        self.translate(sql, None, binds, types)
    }

    fn translate(
        &self,
        sql: &str,
        sources: Option<&HashMap<String, Source>>,
        binds: &BindMap,
        types: &BindTypes,
    ) -> DbResult<NativeStatement> {
        let bytes = sql.as_bytes();
        let quote = self.dialect.quote_char() as u8;
        let positional_input = binds.is_positional();

        let mut out = String::with_capacity(sql.len() + 16);
        let mut state = BindState::new(self.dialect, binds, types);
        let mut copied = 0;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b if self.dialect.opens_literal(b) => {
                    i = self.dialect.skip_literal(bytes, i);
                }
                b if b == quote => {
                    i = skip_quoted(bytes, i, quote);
                }
                b'[' => {
                    let close = sql[i + 1..]
                        .find(']')
                        .map(|p| i + 1 + p)
                        .ok_or_else(|| {
                            DbError::composition(format!("unclosed bracket at offset {i}: {sql}"))
                        })?;
                    let name = sql[i + 1..close].trim();
                    if name.is_empty() {
                        return Err(DbError::composition(format!(
                            "empty identifier at offset {i}: {sql}"
                        )));
                    }
                    out.push_str(&sql[copied..i]);
                    match sources.and_then(|s| s.get(name)) {
                        Some(source) => out.push_str(&self.table_reference(source)),
                        None => self.dialect.write_identifier(name, &mut out),
                    }
                    i = close + 1;
                    copied = i;
                }
                b':' => {
                    if i > 0 && bytes[i - 1] == b':' {
                        i += 1;
                        continue;
                    }
                    if bytes.get(i + 1) == Some(&b':') {
                        i += 2;
                        continue;
                    }
                    let mut end = i + 1;
                    while end < bytes.len() && is_ident_byte(bytes[end]) {
                        end += 1;
                    }
                    let is_placeholder = end > i + 1
                        && bytes.get(end) == Some(&b':')
                        && bytes.get(end + 1) != Some(&b':');
                    if !is_placeholder {
                        i += 1;
                        continue;
                    }
                    if positional_input {
                        return Err(DbError::composition(format!(
                            "named placeholder ':{}:' mixed with positional binds",
                            &sql[i + 1..end]
                        )));
                    }
                    out.push_str(&sql[copied..i]);
                    out.push_str(&state.named(&sql[i + 1..end])?);
                    i = end + 1;
                    copied = i;
                }
                b'?' if positional_input => {
                    out.push_str(&sql[copied..i]);
                    out.push_str(&state.positional()?);
                    i += 1;
                    copied = i;
                }
                _ => i += 1,
            }
        }
        out.push_str(&sql[copied..]);

        let (binds, types) = state.finish();
        Ok(NativeStatement {
            sql: out,
            binds,
            types,
        })
    }
}

/// Index just past the quoted identifier starting at `start`.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Final bind map construction while scanning.
struct BindState<'a> {
    dialect: Dialect,
    input: &'a BindMap,
    input_types: &'a BindTypes,
    binds: BindMap,
    types: BindTypes,
    /// Positional dialects: names in order of first appearance.
    order: Vec<String>,
    next_positional: usize,
}

impl<'a> BindState<'a> {
    fn new(dialect: Dialect, input: &'a BindMap, input_types: &'a BindTypes) -> Self {
        Self {
            dialect,
            input,
            input_types,
            binds: BindMap::new(),
            types: BindTypes::new(),
            order: Vec::new(),
            next_positional: 0,
        }
    }

    fn named(&mut self, name: &str) -> DbResult<String> {
        let value = self.input.get(name).ok_or_else(|| {
            DbError::composition(format!("parameter ':{name}:' is not bound"))
        })?;
        let source_key = BindKey::name(name);

        let (token, key) = if self.dialect.supports_named_placeholders() {
            (self.dialect.named_placeholder(name), source_key.clone())
        } else {
            let index = match self.order.iter().position(|n| n == name) {
                Some(index) => index,
                None => {
                    self.order.push(name.to_string());
                    self.order.len() - 1
                }
            };
            (self.dialect.positional_placeholder(index), BindKey::Index(index))
        };

        self.binds.insert_key(key.clone(), value.clone());
        if let Some(ty) = self.input_types.get(&source_key) {
            self.types.insert(key, *ty);
        }
        Ok(token)
    }

    fn positional(&mut self) -> DbResult<String> {
        let index = self.next_positional;
        let key = BindKey::Index(index);
        let value = self.input.get_key(&key).ok_or_else(|| {
            DbError::composition(format!("positional parameter {} is not bound", index + 1))
        })?;
        self.binds.insert_key(key.clone(), value.clone());
        if let Some(ty) = self.input_types.get(&key) {
            self.types.insert(key, *ty);
        }
        self.next_positional += 1;
        Ok(self.dialect.positional_placeholder(index))
    }

    fn finish(self) -> (BindMap, BindTypes) {
        (self.binds, self.types)
    }
}
