//! # stmtkit
//!
//! Structured query building and execution for relational backends.
//!
//! ## Features
//!
//! - **Fragment merging**: filter fragments carry their own bind values and merge
//!   into one expression no matter how many times conditions are appended
//! - **Intermediate notation**: write `[name]` for identifiers and logical
//!   sources, `:name:` for bound parameters; the compiler turns both into the
//!   backend's own syntax
//! - **Typed binding**: bound values are coerced once to string, integer,
//!   boolean or null; anything else is rejected before it reaches the backend
//! - **Bookkeeping**: transaction state, affected rows, last insert id and an
//!   emulated statement (values inlined) for diagnostics
//! - **Metadata cache**: per-source column, key and numeric-type metadata,
//!   introspected lazily and persisted through a pluggable key-value store
//!
//! ## Query Builder
//!
//! ```ignore
//! use stmtkit::{binds, Db, QueryBuilder, Source, SourceRegistry};
//!
//! let registry = SourceRegistry::new().with(Source::new("orders").schema("shop"));
//! let mut db = stmtkit::postgres::connect(&stmtkit::DbConfig::from_env()?)
//!     .await?
//!     .with_sources(registry);
//!
//! let mut qb = QueryBuilder::select_from("orders");
//! qb.where_(("amount > :min:", binds! { "min" => 10 }))
//!     .order_by(&["created DESC"])
//!     .limit(5, None);
//!
//! let rows = qb.fetch_all(&mut db).await?;
//! println!("{}", db.emulated_sql(Some(64)));
//! ```
//!
//! ## Helpers
//!
//! ```ignore
//! db.insert("student", binds! { "age" => 21, "name" => "mana" }).await?;
//! db.update("student", binds! { "age" => 22 }, ("id = :id:", binds! { "id" => 1 })).await?;
//! db.delete("student", ("id = :id:", binds! { "id" => 1 })).await?;
//! ```

pub mod backend;
pub mod bind;
pub mod builder;
pub mod compiler;
pub mod condition;
pub mod config;
pub mod db;
pub mod dialect;
pub mod emulate;
pub mod error;
pub mod log;
pub mod metadata;
pub mod postgres;
pub mod prelude;
pub mod source;
pub mod store;
pub mod transaction;
pub mod value;

pub use backend::{Backend, BindSlot, BoundParam};
pub use bind::{BindKey, BindMap, BindTypes};
pub use builder::{CompiledStatement, JoinKind, QueryBuilder};
pub use compiler::{NativeStatement, StatementCompiler};
pub use condition::{Condition, Filter};
pub use config::DbConfig;
pub use db::Db;
pub use dialect::Dialect;
pub use error::{BackendError, DbError, DbResult};
pub use log::SqlLogConfig;
pub use metadata::{ColumnDescription, MetadataCache, MetadataEntry, MetadataSource};
pub use source::{Source, SourceRegistry};
pub use store::{FileStore, MemoryStore, MetadataStore};
pub use value::{WireType, WireValue};
