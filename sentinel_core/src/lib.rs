//! # Sentinel core
//!
//! Backend-agnostic pieces of the sentinel migration tool: configuration,
//! migration discovery and ordering, the [`MigrationBackend`] seam, the
//! schema/seed loaders and the [`MigrationRunner`] itself.

#![deny(missing_docs)]

/// The backend trait implemented by every database driver.
pub mod backend;

/// Explicit configuration injected by the process bootstrap.
pub mod config;

/// Error types returned by runs and loaders.
pub mod error;

/// Schema and seed document loaders.
pub mod loader;

/// Migration file discovery and ordering.
pub mod source;

/// Run reports and per-file outcomes.
pub mod report;

/// The migration runner.
pub mod runner;

/// The fixed set of tables verified after a run.
pub mod tables;

pub use backend::{MigrationBackend, MigrationRecord};
pub use config::{ConfigError, DatabaseConfig, Layout, SslMode};
pub use error::RunError;
pub use loader::{InitReport, LoadOutcome, apply_schema, apply_seed, initialize};
pub use report::{FileOutcome, FileReport, RunReport, RunState};
pub use runner::{MigrationRunner, RunnerOptions, SENTINEL_FILENAME, Status};
pub use source::{Lexicographic, MigrationFile, MigrationOrder, SourceError, checksum};
pub use tables::EXPECTED_TABLES;

pub mod prelude {
    //! The prelude module for the `sentinel_core` crate.
    pub use super::{
        DatabaseConfig, FileOutcome, Layout, Lexicographic, MigrationBackend, MigrationFile,
        MigrationOrder, MigrationRecord, MigrationRunner, RunError, RunReport, RunState,
        RunnerOptions, SslMode,
    };
}
