//! # Sentinel
//!
//! Schema, seed and migration runner for the emergency response dashboard
//! database. This crate re-exports the core runner and the enabled backends.

#![deny(missing_docs)]

#[cfg(feature = "postgres")]
/// The postgres backend.
pub mod pg {
    //! Contains the postgres backend for the `sentinel` crate.
    pub use sentinel_pg::*;
}

#[cfg(feature = "in-memory")]
/// The in-memory backend.
pub mod mem {
    //! Contains the in-memory backend for the `sentinel` crate.
    pub use sentinel_mem::*;
}

pub mod prelude {
    //! The prelude module for the `sentinel` crate.
    pub use sentinel_core::prelude::*;

    #[cfg(feature = "in-memory")]
    pub use super::mem::InMemoryDatabase;
    #[cfg(feature = "postgres")]
    pub use super::pg::PgBackend;
}

pub use sentinel_core::*;
