//! Seams between the execution engine and the database.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::migration::VersionRecord;

/// Persistent migration state plus the run lock.
///
/// The store holds exactly one record. Implementations must make `write`
/// atomic so a reader never observes zero or two rows.
pub trait VersionStore: Send {
    /// Create the version table with a `(0, clean)` record. Idempotent.
    fn initialize(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Read the record. Fails with `StoreUninitialized` before `initialize`.
    fn read(&mut self) -> BoxFuture<'_, Result<VersionRecord>>;

    /// Replace the record.
    fn write(&mut self, record: VersionRecord) -> BoxFuture<'_, Result<()>>;

    /// Take the exclusive run lock, failing with `LockTimeout` after `timeout`.
    fn lock(&mut self, timeout: Duration) -> BoxFuture<'_, Result<()>>;

    /// Release the run lock.
    fn unlock(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Executes raw migration statements.
pub trait Driver: Send {
    /// Run `statements` in order, inside one transaction when
    /// `use_transaction` is set.
    fn execute<'a>(
        &'a mut self,
        statements: &'a [String],
        use_transaction: bool,
    ) -> BoxFuture<'a, Result<()>>;

    /// Run `statements` and replace the version record inside a single
    /// transaction, so the schema change and its bookkeeping commit together.
    fn execute_recorded<'a>(
        &'a mut self,
        statements: &'a [String],
        record: VersionRecord,
    ) -> BoxFuture<'a, Result<()>>;
}
