//! Per-source table metadata.
//!
//! A [`MetadataCache`] answers "which columns does this source have, which of
//! them form the primary key, which are numeric, which one auto-increments".
//! Entries are introspected lazily through a [`MetadataSource`] the first time a
//! source is asked for, kept in process for the lifetime of the cache, and
//! optionally persisted through a [`MetadataStore`] so that later processes can
//! skip introspection.
//!
//! Persisted entries are JSON documents:
//!
//! ```text
//! { "version": 1, "retrieved_at": "2024-05-01T10:00:00Z", "entry": { ... } }
//! ```
//!
//! Entries that fail to parse or carry another version are ignored and
//! re-introspected.

use crate::error::{DbError, DbResult};
use crate::log::METADATA_TARGET;
use crate::source::Source;
use crate::store::MetadataStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

/// Default prefix of persisted metadata keys.
pub const DEFAULT_KEY_PREFIX: &str = "meta-";

const PAYLOAD_VERSION: u32 = 1;

/// One column as reported by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    /// Declared type as the server spells it (`int(11)`, `varchar(64)`, `bigint`).
    pub data_type: String,
    pub primary_key: bool,
    pub auto_increment: bool,
}

impl ColumnDescription {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            primary_key: false,
            auto_increment: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// Schema introspection.
pub trait MetadataSource: Send + Sync {
    /// Describe the columns of a source's physical table, in table order.
    fn describe(
        &self,
        source: &Source,
    ) -> impl Future<Output = DbResult<Vec<ColumnDescription>>> + Send;
}

const NUMERIC_TYPES: &[&str] = &[
    "tinyint", "smallint", "mediumint", "int", "integer", "bigint", "int2", "int4", "int8",
    "decimal", "dec", "numeric", "fixed", "float", "float4", "float8", "double",
    "double precision", "real", "serial", "smallserial", "bigserial", "serial2", "serial4",
    "serial8",
];

/// Whether a declared column type holds numbers.
///
/// Matches the type name as a whole, ignoring a `(precision)` suffix and
/// MySQL's `unsigned`/`zerofill` attributes. Arrays never count.
pub fn is_numeric_type(data_type: &str) -> bool {
    let ty = data_type.trim().to_ascii_lowercase();
    if ty.contains('[') {
        return false;
    }

    let mut words: Vec<&str> = ty
        .split(|c: char| c == '(' || c == ')' || c.is_whitespace())
        .filter(|w| !w.is_empty() && !w.bytes().all(|b| b.is_ascii_digit() || b == b','))
        .collect();
    while matches!(words.last(), Some(&("unsigned" | "signed" | "zerofill"))) {
        words.pop();
    }

    let name = words.join(" ");
    NUMERIC_TYPES.contains(&name.as_str())
}

/// Cached metadata of one source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// All column names in table order.
    pub attributes: Vec<String>,
    pub primary_key: Vec<String>,
    pub non_primary_key: Vec<String>,
    /// Columns with a numeric type.
    pub numeric: Vec<String>,
    pub auto_increment: Option<String>,
}

impl MetadataEntry {
    /// Derive an entry from introspected columns.
    pub fn from_columns(source: &str, columns: &[ColumnDescription]) -> DbResult<Self> {
        if columns.is_empty() {
            return Err(DbError::configuration(format!(
                "cannot obtain table columns for source '{source}'"
            )));
        }

        let mut entry = MetadataEntry::default();
        for column in columns {
            entry.attributes.push(column.name.clone());
            if column.primary_key {
                entry.primary_key.push(column.name.clone());
            } else {
                entry.non_primary_key.push(column.name.clone());
            }
            if is_numeric_type(&column.data_type) {
                entry.numeric.push(column.name.clone());
            }
            if column.auto_increment {
                entry.auto_increment = Some(column.name.clone());
            }
        }
        Ok(entry)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a == name)
    }

    pub fn is_numeric(&self, name: &str) -> bool {
        self.numeric.iter().any(|a| a == name)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedMetadata {
    version: u32,
    retrieved_at: DateTime<Utc>,
    entry: MetadataEntry,
}

/// In-process metadata cache with optional persistence.
///
/// Shareable across connections behind an `Arc`. Concurrent first requests for
/// the same source may both introspect; the later result wins.
pub struct MetadataCache {
    entries: RwLock<HashMap<String, Arc<MetadataEntry>>>,
    store: Option<Arc<dyn MetadataStore>>,
    key_prefix: String,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("entries", &self.len())
            .field("persistent", &self.store.is_some())
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl MetadataCache {
    /// Create a cache without persistence.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Create a cache persisting through `store`.
    pub fn with_store(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    /// Set the prefix of persisted keys.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// The store entries persist through, if any.
    pub fn store(&self) -> Option<&Arc<dyn MetadataStore>> {
        self.store.as_ref()
    }

    /// Store key of a source.
    pub fn store_key(&self, source: &str) -> String {
        format!("{}{source}", self.key_prefix)
    }

    /// The in-process entry of a source, without introspecting.
    pub fn cached(&self, source: &str) -> Option<Arc<MetadataEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
    }

    /// Metadata of `source`, loading it from the store or introspecting it.
    pub async fn entry<M>(&self, introspect: &M, source: &Source) -> DbResult<Arc<MetadataEntry>>
    where
        M: MetadataSource + ?Sized,
    {
        if let Some(entry) = self.cached(source.name()) {
            return Ok(entry);
        }

        let key = self.store_key(source.name());
        if let Some(entry) = self.load(&key)? {
            tracing::debug!(target: METADATA_TARGET, source = source.name(), key = %key, "metadata loaded from store");
            return Ok(self.insert(source.name(), entry));
        }

        let columns = introspect.describe(source).await?;
        let entry = MetadataEntry::from_columns(source.name(), &columns)?;
        tracing::debug!(
            target: METADATA_TARGET,
            source = source.name(),
            columns = entry.attributes.len(),
            "metadata introspected"
        );
        self.save(&key, &entry);
        Ok(self.insert(source.name(), entry))
    }

    fn insert(&self, source: &str, entry: MetadataEntry) -> Arc<MetadataEntry> {
        let entry = Arc::new(entry);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.to_string(), entry.clone());
        entry
    }

    fn load(&self, key: &str) -> DbResult<Option<MetadataEntry>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(data) = store.read(key)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<PersistedMetadata>(&data) {
            Ok(persisted) if persisted.version == PAYLOAD_VERSION => Ok(Some(persisted.entry)),
            Ok(persisted) => {
                tracing::warn!(target: METADATA_TARGET, key, version = persisted.version, "ignoring metadata with unknown version");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(target: METADATA_TARGET, key, error = %e, "ignoring unreadable metadata");
                Ok(None)
            }
        }
    }

    fn save(&self, key: &str, entry: &MetadataEntry) {
        let Some(store) = &self.store else {
            return;
        };
        let payload = PersistedMetadata {
            version: PAYLOAD_VERSION,
            retrieved_at: Utc::now(),
            entry: entry.clone(),
        };
        let result = serde_json::to_vec(&payload)
            .map_err(DbError::from)
            .and_then(|data| store.write(key, &data));
        if let Err(e) = result {
            tracing::warn!(target: METADATA_TARGET, key, error = %e, "failed to persist metadata");
        }
    }

    /// Drop the in-process entry of a source. The store is left untouched.
    pub fn invalidate(&self, source: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source)
            .is_some()
    }

    /// Drop every in-process entry.
    pub fn reset(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Describer {
        columns: Vec<ColumnDescription>,
        calls: AtomicUsize,
    }

    impl Describer {
        fn students() -> Self {
            Self {
                columns: vec![
                    ColumnDescription::new("id", "int(11) unsigned")
                        .primary_key()
                        .auto_increment(),
                    ColumnDescription::new("age", "tinyint(4)"),
                    ColumnDescription::new("name", "varchar(64)"),
                    ColumnDescription::new("score", "decimal(5,2)"),
                ],
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl MetadataSource for Describer {
        async fn describe(&self, _source: &Source) -> DbResult<Vec<ColumnDescription>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.columns.clone())
        }
    }

    #[test]
    fn numeric_detection() {
        assert!(is_numeric_type("int(11)"));
        assert!(is_numeric_type("BIGINT"));
        assert!(is_numeric_type("decimal(10,2)"));
        assert!(is_numeric_type("double precision"));
        assert!(!is_numeric_type("varchar(32)"));
        assert!(!is_numeric_type("char(4)"));
        assert!(!is_numeric_type("text"));
        assert!(is_numeric_type("bigint unsigned zerofill"));
        assert!(is_numeric_type("numeric(12,4)"));
        assert!(is_numeric_type("integer"));
        assert!(!is_numeric_type("interval"));
        assert!(!is_numeric_type("point"));
        assert!(!is_numeric_type("integer[]"));
        assert!(!is_numeric_type("timestamp(3) without time zone"));
        assert!(!is_numeric_type("character varying(32)"));
    }

    #[test]
    fn entry_from_columns() {
        let entry = MetadataEntry::from_columns("student", &Describer::students().columns).unwrap();
        assert_eq!(entry.attributes, vec!["id", "age", "name", "score"]);
        assert_eq!(entry.primary_key, vec!["id"]);
        assert_eq!(entry.non_primary_key, vec!["age", "name", "score"]);
        assert_eq!(entry.numeric, vec!["id", "age", "score"]);
        assert_eq!(entry.auto_increment.as_deref(), Some("id"));
        assert!(entry.has_attribute("name"));
        assert!(!entry.is_numeric("name"));
    }

    #[test]
    fn zero_columns_is_an_error() {
        let err = MetadataEntry::from_columns("ghost", &[]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn introspects_once_per_cache() {
        let describer = Describer::students();
        let cache = MetadataCache::new();
        let source = Source::new("student");

        let first = cache.entry(&describer, &source).await.unwrap();
        let second = cache.entry(&describer, &source).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(describer.calls.load(Ordering::SeqCst), 1);

        assert!(cache.invalidate("student"));
        cache.entry(&describer, &source).await.unwrap();
        assert_eq!(describer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persisted_entries_skip_introspection() {
        let store = Arc::new(MemoryStore::new());
        let describer = Describer::students();
        let source = Source::new("student");

        let cache = MetadataCache::with_store(store.clone());
        let entry = cache.entry(&describer, &source).await.unwrap();
        assert!(store.read("meta-student").unwrap().is_some());

        let fresh = MetadataCache::with_store(store.clone());
        let loaded = fresh.entry(&describer, &source).await.unwrap();
        assert_eq!(*loaded, *entry);
        assert_eq!(describer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreadable_payload_is_reintrospected() {
        let store = Arc::new(MemoryStore::new());
        store.write("cache:student", b"not json").unwrap();
        let describer = Describer::students();

        let cache = MetadataCache::with_store(store.clone()).key_prefix("cache:");
        let entry = cache.entry(&describer, &Source::new("student")).await.unwrap();
        assert_eq!(entry.primary_key, vec!["id"]);
        assert_eq!(describer.calls.load(Ordering::SeqCst), 1);

        let data = store.read("cache:student").unwrap().unwrap();
        let persisted: PersistedMetadata = serde_json::from_slice(&data).unwrap();
        assert_eq!(persisted.version, 1);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let describer = Describer::students();
        let cache = MetadataCache::new();
        cache.entry(&describer, &Source::new("a")).await.unwrap();
        cache.entry(&describer, &Source::new("b")).await.unwrap();
        assert_eq!(cache.len(), 2);
        cache.reset();
        assert!(cache.is_empty());
    }
}
