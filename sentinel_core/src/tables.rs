//! Post-migration table verification.

use crate::backend::MigrationBackend;

/// Tables that must exist for the database to count as initialized.
pub const EXPECTED_TABLES: [&str; 6] = [
    "users",
    "agents",
    "alerts",
    "events",
    "messages",
    "audit_logs",
];

/// Returns the first expected table absent from the active schema, in the
/// order of [`EXPECTED_TABLES`].
pub async fn first_missing<B: MigrationBackend>(
    backend: &mut B,
) -> Result<Option<&'static str>, B::Error> {
    let existing = backend.existing_tables(&EXPECTED_TABLES).await?;
    Ok(EXPECTED_TABLES
        .iter()
        .copied()
        .find(|table| !existing.contains(*table)))
}
