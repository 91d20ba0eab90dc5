//! Outcomes of a migration run.

use std::fmt;

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing has touched the database yet.
    NotStarted,
    /// The ledger table exists and has been read.
    LedgerReady,
    /// No migration files were found; the base schema is used instead.
    NoFilesFallback,
    /// Migration files are being applied in order.
    ApplyingFiles,
    /// Checking the expected tables.
    Verifying,
    /// Every step succeeded.
    Completed,
    /// The run stopped on an error.
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happened to a single migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Executed and recorded in this run.
    Applied,
    /// Already in the ledger.
    Skipped,
    /// Execution failed; the transaction was rolled back.
    Failed(String),
}

/// Outcome of one file, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    /// The migration filename.
    pub filename: String,
    /// What happened to it.
    pub outcome: FileOutcome,
}

/// Summary of a migration run.
///
/// Returned on success, and carried inside [`crate::RunError`] when the run
/// fails after touching files, so callers can see exactly how far it got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Per-file outcomes, in the order files were considered.
    pub files: Vec<FileReport>,
    /// Whether the base schema was applied because no files were found.
    ///
    /// The schema is also listed in [`files`](Self::files) as applied.
    pub fallback_applied: bool,
    /// Ledger entries whose file no longer exists on disk.
    pub orphaned: Vec<String>,
    /// Applied files whose content changed since they were recorded.
    pub drifted: Vec<String>,
    /// The state the run ended in.
    pub state: RunState,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            fallback_applied: false,
            orphaned: Vec::new(),
            drifted: Vec::new(),
            state: RunState::NotStarted,
        }
    }
}

impl RunReport {
    pub(crate) fn push(&mut self, filename: &str, outcome: FileOutcome) {
        self.files.push(FileReport {
            filename: filename.to_string(),
            outcome,
        });
    }

    /// Filenames applied in this run, in order.
    pub fn applied(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|f| f.outcome == FileOutcome::Applied)
            .map(|f| f.filename.as_str())
            .collect()
    }

    /// Number of files applied in this run, including the base schema fallback.
    pub fn applied_count(&self) -> usize {
        self.applied().len()
    }

    /// Number of files skipped because they were already recorded.
    pub fn skipped_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.outcome == FileOutcome::Skipped)
            .count()
    }

    /// The file that stopped the run, if any.
    pub fn failed(&self) -> Option<&FileReport> {
        self.files
            .iter()
            .find(|f| matches!(f.outcome, FileOutcome::Failed(_)))
    }
}
