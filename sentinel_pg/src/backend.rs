use async_trait::async_trait;
use sentinel_core::{DatabaseConfig, MigrationBackend, MigrationRecord, SslMode};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{Connection, Executor, PgConnection, PgPool, Postgres};
use std::collections::HashSet;
use std::str::FromStr;

use crate::ledger;

/// Key for the advisory lock held during a run.
const LOCK_NAME: &str = "sentinel_schema_migrations";

/// Errors returned by [`PgBackend`].
#[derive(Debug, thiserror::Error)]
pub enum PgBackendError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The connection was already released by `close`.
    #[error("The database connection has been released")]
    NotConnected,
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Builds driver options from the injected configuration.
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions, PgBackendError> {
    let options = PgConnectOptions::from_str(&config.connection_string)?;
    Ok(options.ssl_mode(pg_ssl_mode(config.ssl_mode)))
}

/// A postgres migration backend.
///
/// Owns a single-connection pool and keeps that one connection checked out
/// from [`connect`](Self::connect) until [`close`](MigrationBackend::close),
/// so the advisory lock, every migration and the verification query all run
/// on the same session.
#[derive(Debug)]
pub struct PgBackend {
    pool: PgPool,
    conn: Option<PoolConnection<Postgres>>,
}

impl PgBackend {
    /// Opens a pool for `config` and checks out the run's connection.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PgBackendError> {
        log::debug!(
            "Connecting to postgres (ssl mode: {}, acquire timeout: {:?})",
            config.ssl_mode,
            config.acquire_timeout
        );
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.acquire_timeout)
            .connect_lazy_with(connect_options(config)?);
        Self::from_pool(pool).await
    }

    /// Checks out a connection from an existing pool.
    ///
    /// The pool is closed when the backend is closed.
    pub async fn from_pool(pool: PgPool) -> Result<Self, PgBackendError> {
        let conn = pool.acquire().await?;
        Ok(Self {
            pool,
            conn: Some(conn),
        })
    }

    fn conn(&mut self) -> Result<&mut PgConnection, PgBackendError> {
        self.conn.as_deref_mut().ok_or(PgBackendError::NotConnected)
    }
}

#[async_trait]
impl MigrationBackend for PgBackend {
    type Error = PgBackendError;

    async fn ping(&mut self) -> Result<(), Self::Error> {
        sqlx::query("SELECT 1").execute(self.conn()?).await?;
        Ok(())
    }

    /// Takes a session-level advisory lock.
    ///
    /// Uses the MD5-based dual-int4 key so the lock name maps onto the full
    /// 64-bit key space.
    async fn lock(&mut self) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            SELECT pg_advisory_lock(
                ('x' || substr(md5($1), 1, 8))::bit(32)::int,
                ('x' || substr(md5($1), 9, 8))::bit(32)::int
            )
            "#,
        )
        .bind(LOCK_NAME)
        .execute(self.conn()?)
        .await?;

        Ok(())
    }

    async fn unlock(&mut self) -> Result<bool, Self::Error> {
        let result: (bool,) = sqlx::query_as(
            r#"
            SELECT pg_advisory_unlock(
                ('x' || substr(md5($1), 1, 8))::bit(32)::int,
                ('x' || substr(md5($1), 9, 8))::bit(32)::int
            )
            "#,
        )
        .bind(LOCK_NAME)
        .fetch_one(self.conn()?)
        .await?;

        Ok(result.0)
    }

    async fn ensure_ledger(&mut self) -> Result<(), Self::Error> {
        ledger::ensure(self.conn()?).await?;
        Ok(())
    }

    async fn list_applied(&mut self) -> Result<Vec<MigrationRecord>, Self::Error> {
        Ok(ledger::list(self.conn()?).await?)
    }

    async fn record_applied(
        &mut self,
        filename: &str,
        checksum: Option<&str>,
    ) -> Result<bool, Self::Error> {
        Ok(ledger::record(self.conn()?, filename, checksum).await?)
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), Self::Error> {
        Executor::execute(self.conn()?, sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn apply_and_record(
        &mut self,
        filename: &str,
        sql: &str,
        checksum: Option<&str>,
    ) -> Result<bool, Self::Error> {
        // Dropping the transaction without commit rolls it back.
        let mut tx = self.conn()?.begin().await?;
        Executor::execute(&mut *tx, sqlx::raw_sql(sql)).await?;
        let inserted = ledger::record(&mut tx, filename, checksum).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn existing_tables(&mut self, names: &[&str]) -> Result<HashSet<String>, Self::Error> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT table_name::TEXT
            FROM information_schema.tables
            WHERE table_schema = current_schema()
              AND table_name::TEXT = ANY($1)
            "#,
        )
        .bind(names)
        .fetch_all(self.conn()?)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        if let Some(conn) = self.conn.take() {
            drop(conn);
            self.pool.close().await;
            log::debug!("Closed postgres pool");
        }
        Ok(())
    }
}
