//! Filter fragments and the condition merger.
//!
//! This module provides [`Condition`] (one expression with its bind values and
//! declared types) and [`Filter`], which combines fragments into a single boolean
//! expression with merged bind maps.
//!
//! Expressions use the intermediate notation: `:name:` for bound parameters and
//! `[name]` for identifiers.
//!
//! # Example
//! ```ignore
//! use stmtkit::{binds, Condition, Filter};
//!
//! let mut filter = Filter::merge([
//!     Condition::from("status = 'active'"),
//!     Condition::new("created > :min:").with_binds(binds! { "min" => "2013-01-01" }),
//! ]);
//! filter.in_list("id", [1, 2, 3]);
//! ```

use crate::bind::{BindKey, BindMap, BindTypes, merge_types};
use crate::value::WireType;
use serde_json::Value;

/// Prefix of generated (synthetic) parameter names.
pub const AUTOGEN_PREFIX: &str = "ABP";

/// One filter fragment: an expression plus the values and types it binds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    pub expr: String,
    pub binds: BindMap,
    pub types: BindTypes,
}

impl Condition {
    /// Create a fragment without bound values.
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            binds: BindMap::new(),
            types: BindTypes::new(),
        }
    }

    /// Bind a named value.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.binds.insert(name, value);
        self
    }

    /// Merge a bind map into this fragment.
    pub fn with_binds(mut self, binds: BindMap) -> Self {
        self.binds.merge(binds);
        self
    }

    /// Declare the wire type of a named parameter.
    pub fn typed(mut self, name: impl Into<String>, ty: WireType) -> Self {
        self.types.insert(BindKey::Name(name.into()), ty);
        self
    }

    /// Merge declared types into this fragment.
    pub fn with_types(mut self, types: BindTypes) -> Self {
        merge_types(&mut self.types, types);
        self
    }
}

impl From<&str> for Condition {
    fn from(expr: &str) -> Self {
        Condition::new(expr)
    }
}

impl From<String> for Condition {
    fn from(expr: String) -> Self {
        Condition::new(expr)
    }
}

impl<S: Into<String>> From<(S, BindMap)> for Condition {
    fn from((expr, binds): (S, BindMap)) -> Self {
        Condition::new(expr).with_binds(binds)
    }
}

impl<S: Into<String>> From<(S, BindMap, BindTypes)> for Condition {
    fn from((expr, binds, types): (S, BindMap, BindTypes)) -> Self {
        Condition::new(expr).with_binds(binds).with_types(types)
    }
}

/// An accumulated filter expression with merged bind maps.
///
/// Synthetic parameter names (`ABP0`, `ABP1`, ...) come from a counter owned by
/// the filter, so helpers never collide with each other within one filter.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    expr: String,
    binds: BindMap,
    types: BindTypes,
    hidden_param: usize,
}

impl Filter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge fragments into one filter.
    ///
    /// Expressions are joined with ` AND ` in order; empty expressions are skipped.
    /// Duplicate bind names across fragments are merged last-write-wins.
    pub fn merge<I, C>(fragments: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Condition>,
    {
        let mut filter = Filter::new();
        let mut exprs = Vec::new();
        for fragment in fragments {
            let Condition { expr, binds, types } = fragment.into();
            if !expr.is_empty() {
                exprs.push(expr);
            }
            filter.binds.merge(binds);
            merge_types(&mut filter.types, types);
        }
        filter.expr = exprs.join(" AND ");
        filter
    }

    /// The combined expression (empty when there is no condition).
    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn binds(&self) -> &BindMap {
        &self.binds
    }

    pub fn types(&self) -> &BindTypes {
        &self.types
    }

    pub fn is_empty(&self) -> bool {
        self.expr.is_empty()
    }

    pub fn into_parts(self) -> (String, BindMap, BindTypes) {
        (self.expr, self.binds, self.types)
    }

    fn absorb(&mut self, binds: BindMap, types: BindTypes) {
        self.binds.merge(binds);
        merge_types(&mut self.types, types);
    }

    /// Replace the expression, merging the fragment's bind maps.
    pub fn set(&mut self, condition: impl Into<Condition>) -> &mut Self {
        let Condition { expr, binds, types } = condition.into();
        self.expr = expr;
        self.absorb(binds, types);
        self
    }

    /// Append with AND: `(<current>) AND (<new>)`.
    pub fn and(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.combine("AND", condition.into())
    }

    /// Append with OR: `(<current>) OR (<new>)`.
    pub fn or(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.combine("OR", condition.into())
    }

    fn combine(&mut self, op: &str, condition: Condition) -> &mut Self {
        let Condition { expr, binds, types } = condition;
        if self.expr.is_empty() {
            self.expr = expr;
        } else if !expr.is_empty() {
            self.expr = format!("({}) {op} ({expr})", self.expr);
        }
        self.absorb(binds, types);
        self
    }

    fn next_param(&mut self) -> String {
        let key = format!("{AUTOGEN_PREFIX}{}", self.hidden_param);
        self.hidden_param += 1;
        key
    }

    /// Append `field BETWEEN :lo: AND :hi:`.
    pub fn between(
        &mut self,
        field: &str,
        min: impl Into<Value>,
        max: impl Into<Value>,
    ) -> &mut Self {
        self.range("BETWEEN", field, min.into(), max.into())
    }

    /// Append `field NOT BETWEEN :lo: AND :hi:`.
    pub fn not_between(
        &mut self,
        field: &str,
        min: impl Into<Value>,
        max: impl Into<Value>,
    ) -> &mut Self {
        self.range("NOT BETWEEN", field, min.into(), max.into())
    }

    fn range(&mut self, op: &str, field: &str, min: Value, max: Value) -> &mut Self {
        let min_key = self.next_param();
        let max_key = self.next_param();
        let expr = format!("{field} {op} :{min_key}: AND :{max_key}:");
        let mut binds = BindMap::new();
        binds.insert(min_key, min).insert(max_key, max);
        self.and(Condition::new(expr).with_binds(binds))
    }

    /// Append `field IN (...)`; an empty list appends `field != field`.
    pub fn in_list<I, V>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.list("IN", field, values.into_iter().map(Into::into).collect())
    }

    /// Append `field NOT IN (...)`; an empty list appends `field != field`.
    pub fn not_in<I, V>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.list("NOT IN", field, values.into_iter().map(Into::into).collect())
    }

    fn list(&mut self, op: &str, field: &str, values: Vec<Value>) -> &mut Self {
        if values.is_empty() {
            return self.and(format!("{field} != {field}"));
        }

        let mut binds = BindMap::new();
        let mut keys = Vec::with_capacity(values.len());
        for value in values {
            let key = self.next_param();
            keys.push(format!(":{key}:"));
            binds.insert(key, value);
        }
        let expr = format!("{field} {op} ({})", keys.join(", "));
        self.and(Condition::new(expr).with_binds(binds))
    }
}

impl From<&str> for Filter {
    fn from(expr: &str) -> Self {
        Filter::merge([expr])
    }
}

impl From<String> for Filter {
    fn from(expr: String) -> Self {
        Filter::merge([expr])
    }
}

impl From<Condition> for Filter {
    fn from(condition: Condition) -> Self {
        Filter::merge([condition])
    }
}

impl<S: Into<String>> From<(S, BindMap)> for Filter {
    fn from(fragment: (S, BindMap)) -> Self {
        Filter::merge([Condition::from(fragment)])
    }
}

impl From<Vec<Condition>> for Filter {
    fn from(conditions: Vec<Condition>) -> Self {
        Filter::merge(conditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binds;
    use serde_json::json;

    #[test]
    fn merge_joins_with_and_in_order() {
        let filter = Filter::merge([
            Condition::from("a = 1"),
            Condition::new("b > :min:").bind("min", 5),
            Condition::from("c IS NULL"),
        ]);
        assert_eq!(filter.expr(), "a = 1 AND b > :min: AND c IS NULL");
        assert_eq!(filter.expr().matches(" AND ").count(), 2);
        assert_eq!(filter.binds().get("min"), Some(&json!(5)));
    }

    #[test]
    fn merge_overwrites_duplicate_names() {
        let filter = Filter::merge([
            Condition::new("a = :v:").bind("v", 1),
            Condition::new("b = :v:").bind("v", 2),
        ]);
        assert_eq!(filter.binds().len(), 1);
        assert_eq!(filter.binds().get("v"), Some(&json!(2)));
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        let filter = Filter::merge(Vec::<Condition>::new());
        assert!(filter.is_empty());
        assert!(filter.binds().is_empty());
    }

    #[test]
    fn merge_keeps_types() {
        let mut types = BindTypes::new();
        types.insert(BindKey::name("min"), WireType::Str);
        let filter = Filter::merge([(
            "created > :min:",
            binds! { "min" => "2013-01-01" },
            types,
        )]);
        assert_eq!(
            filter.types().get(&BindKey::name("min")),
            Some(&WireType::Str)
        );
    }

    #[test]
    fn and_or_wrap_in_parentheses() {
        let mut filter = Filter::new();
        filter.and("a = 1").and("b = 2").or("c = 3");
        assert_eq!(filter.expr(), "((a = 1) AND (b = 2)) OR (c = 3)");
    }

    #[test]
    fn set_replaces_expression_but_keeps_binds() {
        let mut filter = Filter::new();
        filter.and(Condition::new("a = :a:").bind("a", 1));
        filter.set(Condition::new("b = :b:").bind("b", 2));
        assert_eq!(filter.expr(), "b = :b:");
        assert_eq!(filter.binds().len(), 2);
    }

    #[test]
    fn between_generates_synthetic_names() {
        let mut filter = Filter::new();
        filter.between("price", 100, 200).not_between("qty", 1, 2);
        assert_eq!(
            filter.expr(),
            "(price BETWEEN :ABP0: AND :ABP1:) AND (qty NOT BETWEEN :ABP2: AND :ABP3:)"
        );
        assert_eq!(filter.binds().get("ABP0"), Some(&json!(100)));
        assert_eq!(filter.binds().get("ABP3"), Some(&json!(2)));
    }

    #[test]
    fn in_list_binds_each_value_in_order() {
        let mut filter = Filter::new();
        filter.in_list("id", [10, 20, 30]);
        assert_eq!(filter.expr(), "id IN (:ABP0:, :ABP1:, :ABP2:)");
        let values: Vec<&Value> = filter.binds().iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![&json!(10), &json!(20), &json!(30)]);
    }

    #[test]
    fn empty_in_list_is_never_true() {
        let mut filter = Filter::new();
        filter.in_list("id", Vec::<i64>::new());
        assert_eq!(filter.expr(), "id != id");
        assert!(filter.binds().is_empty());

        let mut filter = Filter::new();
        filter.not_in("id", Vec::<i64>::new());
        assert_eq!(filter.expr(), "id != id");
        assert!(filter.binds().is_empty());
    }

    #[test]
    fn not_in_uses_fresh_names_after_in() {
        let mut filter = Filter::new();
        filter.in_list("a", [1]).not_in("b", ["x", "y"]);
        assert_eq!(
            filter.expr(),
            "(a IN (:ABP0:)) AND (b NOT IN (:ABP1:, :ABP2:))"
        );
        assert_eq!(filter.binds().len(), 3);
    }
}
