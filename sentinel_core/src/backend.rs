//! The database seam the runner drives.

use async_trait::async_trait;
use std::collections::HashSet;

/// A row of the migration ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Identifier assigned by the storage.
    pub id: i64,
    /// The migration filename. Unique across the ledger.
    pub filename: String,
    /// When the migration was recorded.
    pub executed_at: chrono::DateTime<chrono::Utc>,
    /// SHA-256 of the file content at the time it was applied, if known.
    pub checksum: Option<String>,
}

/// Operations a database driver must provide for the runner and loaders.
///
/// An implementation owns exactly one checked-out connection for its whole
/// lifetime; every call runs on that connection, strictly in sequence.
/// [`MigrationBackend::close`] releases it and must be safe to call on any
/// path, including after a failed operation.
///
/// # Example
///
/// ```rust,ignore
/// use sentinel_core::{MigrationRunner, Layout};
/// use sentinel_pg::PgBackend;
///
/// let backend = PgBackend::connect(&config).await?;
/// let report = MigrationRunner::new(backend, Layout::default()).run().await?;
/// println!("Applied {} migrations", report.applied_count());
/// ```
#[async_trait]
pub trait MigrationBackend: Send {
    /// The error returned by every operation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Cheap round-trip that proves the connection works.
    async fn ping(&mut self) -> Result<(), Self::Error>;

    /// Blocks until this backend holds the migration lock for the database.
    async fn lock(&mut self) -> Result<(), Self::Error>;

    /// Releases the migration lock. Returns `false` if it wasn't held.
    async fn unlock(&mut self) -> Result<bool, Self::Error>;

    /// Creates the ledger table if it does not exist. Idempotent.
    async fn ensure_ledger(&mut self) -> Result<(), Self::Error>;

    /// Returns every ledger row, oldest first.
    async fn list_applied(&mut self) -> Result<Vec<MigrationRecord>, Self::Error>;

    /// Inserts `filename` into the ledger.
    ///
    /// A duplicate filename is ignored rather than reported. Returns whether a
    /// new row was written.
    async fn record_applied(
        &mut self,
        filename: &str,
        checksum: Option<&str>,
    ) -> Result<bool, Self::Error>;

    /// Executes a SQL document as a single batch, outside any transaction.
    async fn execute_batch(&mut self, sql: &str) -> Result<(), Self::Error>;

    /// Executes `sql` and records `filename` inside one transaction.
    ///
    /// Either both the schema change and the ledger row are committed, or
    /// neither is. Returns whether a new ledger row was written.
    async fn apply_and_record(
        &mut self,
        filename: &str,
        sql: &str,
        checksum: Option<&str>,
    ) -> Result<bool, Self::Error>;

    /// Returns the subset of `names` that exist as tables in the active schema.
    async fn existing_tables(&mut self, names: &[&str]) -> Result<HashSet<String>, Self::Error>;

    /// Releases the connection and shuts the pool down.
    async fn close(&mut self) -> Result<(), Self::Error>;
}
