//! Transaction helper macro.
//!
//! [`Db`](crate::Db) tracks one level of transaction. [`transaction!`] wraps a
//! block between [`Db::begin`](crate::Db::begin) and
//! [`Db::commit`](crate::Db::commit), rolling back when the block fails.
//!
//! # Example
//!
//! ```ignore
//! use stmtkit::{binds, DbResult};
//!
//! # async fn demo(db: &mut stmtkit::Db<tokio_postgres::Client>) -> DbResult<()> {
//! stmtkit::transaction!(db, {
//!     db.execute("UPDATE accounts SET balance = balance - $1 WHERE id = $2",
//!         &stmtkit::BindMap::positional([100, 1])).await?;
//!     db.insert("ledger", binds! { "account" => 1, "delta" => -100 }).await?;
//!     Ok(())
//! })?;
//! # Ok(()) }
//! ```

/// Runs the given block inside a transaction on `$db`.
///
/// - Begins via `$db.begin().await`.
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)`.
///
/// The block must evaluate to `stmtkit::DbResult<T>`.
#[macro_export]
macro_rules! transaction {
    ($db:ident, $body:block) => {{
        $db.begin().await?;

        let __stmtkit_tx_body_result: $crate::DbResult<_> = async { $body }.await;
        match __stmtkit_tx_body_result {
            Ok(value) => {
                $db.commit().await?;
                Ok(value)
            }
            Err(error) => match $db.rollback().await {
                Ok(()) => Err(error),
                Err(rollback_err) => Err($crate::DbError::transaction(format!(
                    "{error} (rollback failed: {rollback_err})"
                ))),
            },
        }
    }};
}
