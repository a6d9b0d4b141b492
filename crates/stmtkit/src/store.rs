//! Key-value persistence for metadata entries.

use crate::error::{DbError, DbResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Byte-oriented key-value store.
pub trait MetadataStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn read(&self, key: &str) -> DbResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    fn write(&self, key: &str, value: &[u8]) -> DbResult<()>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataStore for MemoryStore {
    fn read(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| DbError::Store("memory store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &[u8]) -> DbResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| DbError::Store("memory store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// One JSON file per key inside a directory.
///
/// Writes go to a temporary file first and are renamed into place, so a reader
/// never observes a partially written entry.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`. Characters outside `[A-Za-z0-9_.-]` become `_`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl MetadataStore for FileStore {
    fn read(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DbError::Store(e.to_string())),
        }
    }

    fn write(&self, key: &str, value: &[u8]) -> DbResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| DbError::Store(e.to_string()))?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, value).map_err(|e| DbError::Store(e.to_string()))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| DbError::Store(e.to_string()))?;
        Ok(())
    }
}
