//! Statements for the `schema_migrations` ledger.
//!
//! The table keeps one row per applied migration filename. `filename` is
//! unique, so recording the same file twice is a no-op.

use sentinel_core::MigrationRecord;
use sqlx::{PgConnection, Row};

/// Name of the ledger table.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// Creates the ledger table if it does not exist.
///
/// Ledgers created before checksums were tracked get the column added.
pub async fn ensure(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            id BIGSERIAL PRIMARY KEY,
            filename VARCHAR(255) NOT NULL UNIQUE,
            executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            checksum VARCHAR(64)
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query("ALTER TABLE schema_migrations ADD COLUMN IF NOT EXISTS checksum VARCHAR(64)")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Returns every ledger row, oldest first.
pub async fn list(conn: &mut PgConnection) -> Result<Vec<MigrationRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id::BIGINT AS id, filename, executed_at::TIMESTAMPTZ AS executed_at, checksum
        FROM schema_migrations
        ORDER BY id ASC
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| MigrationRecord {
            id: row.get("id"),
            filename: row.get("filename"),
            executed_at: row.get("executed_at"),
            checksum: row.get("checksum"),
        })
        .collect())
}

/// Inserts a ledger row. Returns `false` if `filename` was already recorded.
pub async fn record(
    conn: &mut PgConnection,
    filename: &str,
    checksum: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO schema_migrations (filename, checksum)
        VALUES ($1, $2)
        ON CONFLICT (filename) DO NOTHING
        "#,
    )
    .bind(filename)
    .bind(checksum)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
