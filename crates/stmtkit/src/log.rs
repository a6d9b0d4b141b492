//! Statement logging via `tracing`.
//!
//! Every executed statement emits one event on target `stmtkit.sql` carrying
//! the emulated SQL, the parameter count, the elapsed time and the affected-row
//! count. Statements slower than the configured threshold are additionally
//! reported at WARN. Transaction boundaries go to `stmtkit.tx`, metadata cache
//! activity to `stmtkit.metadata`.

use std::time::Duration;
use tracing::Level;

/// Target of statement events.
pub const SQL_TARGET: &str = "stmtkit.sql";
/// Target of transaction events.
pub const TX_TARGET: &str = "stmtkit.tx";
/// Target of metadata cache events.
pub const METADATA_TARGET: &str = "stmtkit.metadata";

/// How statements are logged.
#[derive(Debug, Clone)]
pub struct SqlLogConfig {
    /// Tracing event level to emit at.
    pub level: Level,
    /// Truncate logged SQL (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
    /// Bound strings this long or longer are cut in the emulated SQL.
    pub preserved_string_length: Option<usize>,
    /// Statements taking longer are reported at WARN.
    pub slow_query_threshold: Option<Duration>,
}

impl Default for SqlLogConfig {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            max_sql_length: Some(1000),
            preserved_string_length: Some(64),
            slow_query_threshold: None,
        }
    }
}

impl SqlLogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the tracing event level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set maximum SQL length to display.
    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    /// Disable SQL truncation.
    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    /// Set the length from which bound strings are shortened.
    pub fn preserved_string_length(mut self, len: usize) -> Self {
        self.preserved_string_length = Some(len);
        self
    }

    pub fn slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = Some(threshold);
        self
    }

    /// Whether statement events can be observed at all.
    pub(crate) fn enabled(&self) -> bool {
        tracing::level_filters::LevelFilter::current() >= self.level
            || self.slow_query_threshold.is_some()
    }

    pub(crate) fn truncate_sql<'a>(&self, sql: &'a str) -> std::borrow::Cow<'a, str> {
        match self.max_sql_length {
            Some(max) if sql.len() > max => {
                let mut end = max;
                while end > 0 && !sql.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &sql[..end]).into()
            }
            _ => sql.into(),
        }
    }

    /// Emit the event of one executed statement.
    pub(crate) fn statement(&self, sql: &str, param_count: usize, elapsed: Duration, rows: u64) {
        /// Dispatch a tracing event at a runtime-determined level.
        macro_rules! emit_at_level {
            ($level:expr, $($field:tt)*) => {
                match $level {
                    Level::ERROR => tracing::error!($($field)*),
                    Level::WARN  => tracing::warn!($($field)*),
                    Level::INFO  => tracing::info!($($field)*),
                    Level::DEBUG => tracing::debug!($($field)*),
                    Level::TRACE => tracing::trace!($($field)*),
                }
            };
        }

        let sql = self.truncate_sql(sql);
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        emit_at_level!(
            self.level,
            target: SQL_TARGET,
            param_count,
            elapsed_ms,
            rows,
            sql = %sql,
        );

        if let Some(threshold) = self.slow_query_threshold {
            if elapsed > threshold {
                tracing::warn!(
                    target: SQL_TARGET,
                    elapsed_ms,
                    threshold_ms = threshold.as_millis() as u64,
                    sql = %sql,
                    "slow query"
                );
            }
        }
    }
}
