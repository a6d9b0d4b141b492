//! Engine configuration.

use crate::error::{DbError, DbResult};
use crate::log::SqlLogConfig;
use crate::metadata::DEFAULT_KEY_PREFIX;
use std::fmt;

/// Configuration for [`Db`](crate::db::Db) and [`connect`](crate::postgres::connect).
#[derive(Clone)]
pub struct DbConfig {
    /// Connection string. Only needed when the crate opens the connection itself.
    pub database_url: Option<String>,
    /// Statement logging.
    pub log: SqlLogConfig,
    /// Prefix of persisted metadata keys, applied to the cache a
    /// [`Db`](crate::db::Db) builds for itself.
    pub metadata_key_prefix: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            log: SqlLogConfig::default(),
            metadata_key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("log", &self.log)
            .field("metadata_key_prefix", &self.metadata_key_prefix)
            .finish()
    }
}

impl DbConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `DATABASE_URL` (required).
    ///
    /// Quoting and placeholder style are not configurable: they always follow
    /// the backend's [`dialect`](crate::backend::Backend::dialect).
    pub fn from_env() -> DbResult<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| DbError::configuration("DATABASE_URL is not set"))?;
        Ok(Self::new().database_url(database_url))
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn log(mut self, log: SqlLogConfig) -> Self {
        self.log = log;
        self
    }

    pub fn metadata_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metadata_key_prefix = prefix.into();
        self
    }
}
