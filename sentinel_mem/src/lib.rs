//! # Sentinel memory backend
//!
//! An in-process stand-in for a database, for testing the runner and loaders
//! without a server. It understands just enough SQL to track tables:
//! `CREATE TABLE` and `DROP TABLE` statements change the table catalog, every
//! other statement is accepted as-is.
//!
//! ```ignore
//! use sentinel_core::{Layout, MigrationRunner};
//! use sentinel_mem::InMemoryDatabase;
//!
//! let db = InMemoryDatabase::new();
//! let report = MigrationRunner::new(db.connect(), Layout::rooted_at(dir))
//!     .run()
//!     .await?;
//!
//! assert_eq!(db.ledger().await.len(), report.applied_count());
//! ```
//!
//! Failures can be injected with [`InMemoryDatabase::fail_on`] and
//! [`InMemoryDatabase::set_reachable`].

#![deny(missing_docs)]

mod backend;
mod database;

pub use backend::*;
pub use database::*;
