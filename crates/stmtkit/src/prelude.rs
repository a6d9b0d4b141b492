//! Convenient imports for typical `stmtkit` usage.
//!
//! ```ignore
//! use stmtkit::prelude::*;
//! ```

pub use crate::{
    Backend, BindMap, Condition, Db, DbConfig, DbError, DbResult, Dialect, Filter, QueryBuilder,
    Source, SourceRegistry,
};
pub use crate::{binds, transaction};
