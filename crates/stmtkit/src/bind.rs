//! Ordered bind-parameter maps.
//!
//! A [`BindMap`] maps parameter keys to dynamically typed values. Keys are either
//! names (`:name:` placeholders) or 0-based positions. Merging is
//! last-write-wins: an overwritten key keeps its original position and takes the
//! later value. Generated parameters must therefore use synthetic names.

use crate::value::WireType;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;

/// Key of a bound parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindKey {
    /// 0-based positional parameter.
    Index(usize),
    /// Named parameter, without any prefix or suffix.
    Name(String),
}

impl BindKey {
    pub fn name(name: impl Into<String>) -> Self {
        BindKey::Name(name.into())
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            BindKey::Name(n) => Some(n),
            BindKey::Index(_) => None,
        }
    }
}

impl fmt::Display for BindKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindKey::Index(i) => write!(f, "{i}"),
            BindKey::Name(n) => f.write_str(n),
        }
    }
}

impl From<&str> for BindKey {
    fn from(name: &str) -> Self {
        BindKey::Name(name.to_string())
    }
}

impl From<String> for BindKey {
    fn from(name: String) -> Self {
        BindKey::Name(name)
    }
}

impl From<usize> for BindKey {
    fn from(index: usize) -> Self {
        BindKey::Index(index)
    }
}

/// Declared wire types for bound parameters.
pub type BindTypes = IndexMap<BindKey, WireType>;

/// Merge `other` into `types`, later entries overwriting earlier ones.
pub fn merge_types(types: &mut BindTypes, other: BindTypes) {
    for (key, ty) in other {
        types.insert(key, ty);
    }
}

/// An ordered parameter map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindMap {
    entries: IndexMap<BindKey, Value>,
}

impl BindMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a positional map from values, in order.
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut map = Self::new();
        for v in values {
            map.push(v);
        }
        map
    }

    /// Bind a named parameter (overwrites an existing binding in place).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.entries.insert(BindKey::Name(name.into()), value.into());
        self
    }

    /// Bind a value under an explicit key.
    pub fn insert_key(&mut self, key: BindKey, value: impl Into<Value>) -> &mut Self {
        self.entries.insert(key, value.into());
        self
    }

    /// Append a positional parameter after the existing positional ones.
    pub fn push(&mut self, value: impl Into<Value>) -> &mut Self {
        let next = self
            .entries
            .keys()
            .filter(|k| matches!(k, BindKey::Index(_)))
            .count();
        self.entries.insert(BindKey::Index(next), value.into());
        self
    }

    /// Merge another map into this one (last write wins).
    pub fn merge(&mut self, other: BindMap) -> &mut Self {
        for (key, value) in other.entries {
            self.entries.insert(key, value);
        }
        self
    }

    /// Look up a named parameter.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(&BindKey::Name(name.to_string()))
    }

    /// Look up a parameter by key.
    pub fn get_key(&self, key: &BindKey) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether every key is positional.
    pub fn is_positional(&self) -> bool {
        !self.entries.is_empty() && self.entries.keys().all(|k| matches!(k, BindKey::Index(_)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BindKey, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &BindKey> {
        self.entries.keys()
    }
}

impl<K, V> FromIterator<(K, V)> for BindMap
where
    K: Into<BindKey>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = BindMap::new();
        for (k, v) in iter {
            map.entries.insert(k.into(), v.into());
        }
        map
    }
}

impl IntoIterator for BindMap {
    type Item = (BindKey, Value);
    type IntoIter = indexmap::map::IntoIter<BindKey, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Build a named [`BindMap`].
///
/// ```ignore
/// let binds = stmtkit::binds! { "min" => 10, "name" => "mana" };
/// ```
#[macro_export]
macro_rules! binds {
    () => {
        $crate::BindMap::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut __stmtkit_binds = $crate::BindMap::new();
        $(
            __stmtkit_binds.insert($name, $value);
        )+
        __stmtkit_binds
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_is_last_write_wins_in_place() {
        let mut a = BindMap::new();
        a.insert("x", 1).insert("y", 2);
        let mut b = BindMap::new();
        b.insert("z", 3).insert("x", 9);

        a.merge(b);

        let keys: Vec<String> = a.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["x", "y", "z"]);
        assert_eq!(a.get("x"), Some(&json!(9)));
    }

    #[test]
    fn push_numbers_positions() {
        let map = BindMap::positional(["a", "b"]);
        assert!(map.is_positional());
        assert_eq!(map.get_key(&BindKey::Index(1)), Some(&json!("b")));
    }

    #[test]
    fn named_is_not_positional() {
        let map = crate::binds! { "age" => 21 };
        assert!(!map.is_positional());
        assert!(!BindMap::new().is_positional());
    }

    #[test]
    fn collect_from_pairs() {
        let map: BindMap = [("a", json!(1)), ("b", json!("x"))].into_iter().collect();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("b"), Some(&json!("x")));
    }
}
