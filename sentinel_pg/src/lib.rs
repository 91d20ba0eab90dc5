//! # Sentinel postgres backend

#![deny(missing_docs)]

/// The [`MigrationBackend`](sentinel_core::MigrationBackend) implementation for postgres
pub mod backend;

/// Ledger table statements
pub mod ledger;

pub use backend::{PgBackend, PgBackendError};
pub use ledger::LEDGER_TABLE;
