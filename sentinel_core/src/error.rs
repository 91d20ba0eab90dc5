use crate::report::RunReport;
use std::path::PathBuf;

/// Errors that stop a migration or initialization run.
///
/// Generic over the backend's error so the underlying driver error is kept
/// as the [`std::error::Error::source`].
#[derive(Debug, thiserror::Error)]
pub enum RunError<E>
where
    E: std::error::Error + 'static,
{
    /// The connectivity probe failed. Nothing was applied.
    #[error("Could not reach the database: {0}")]
    Connectivity(#[source] E),

    /// The migration lock could not be taken.
    #[error("Could not acquire the migration lock: {0}")]
    Lock(#[source] E),

    /// Creating or reading the ledger failed.
    #[error("Migration ledger error: {0}")]
    Ledger(#[source] E),

    /// A document exists but could not be read.
    #[error("Could not read {}: {source}", path.display())]
    Io {
        /// The file or directory being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A SQL document failed to execute.
    #[error("Executing {filename} failed: {source}")]
    Execution {
        /// The migration filename, or the schema/seed document path.
        filename: String,
        /// The driver error.
        #[source]
        source: E,
        /// Outcomes up to and including the failing file.
        report: Box<RunReport>,
    },

    /// Reading the table catalog during verification failed.
    #[error("Could not read the table catalog: {0}")]
    Catalog(#[source] E),

    /// An expected table is absent after all migrations ran.
    #[error("Expected table '{table}' does not exist after migration")]
    MissingTable {
        /// The first missing table.
        table: String,
        /// Outcomes of the run that preceded verification.
        report: Box<RunReport>,
    },
}

impl<E> RunError<E>
where
    E: std::error::Error + 'static,
{
    /// The partial run report, when the run got far enough to produce one.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunError::Execution { report, .. } | RunError::MissingTable { report, .. } => {
                Some(&**report)
            }
            _ => None,
        }
    }
}
