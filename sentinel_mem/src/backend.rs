use async_trait::async_trait;
use sentinel_core::{MigrationBackend, MigrationRecord};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tokio::sync::OwnedSemaphorePermit;

use crate::database::{InMemoryDatabase, MemBackendError, MemDatabase};

/// One connection to an [`InMemoryDatabase`].
///
/// Holds the database-wide migration lock between `lock` and `unlock` (or
/// `close`), so a second backend calling `lock` waits, as a Postgres session
/// waiting on an advisory lock would.
#[derive(Debug)]
pub struct InMemoryBackend {
    db: InMemoryDatabase,
    connected: bool,
    permit: Option<OwnedSemaphorePermit>,
}

impl InMemoryBackend {
    pub(crate) fn new(db: InMemoryDatabase) -> Self {
        db.connections.fetch_add(1, Ordering::SeqCst);
        Self {
            db,
            connected: true,
            permit: None,
        }
    }

    /// The database this connection belongs to.
    pub fn database(&self) -> &InMemoryDatabase {
        &self.db
    }

    async fn with_data<T>(
        &self,
        f: impl FnOnce(&mut MemDatabase) -> Result<T, MemBackendError>,
    ) -> Result<T, MemBackendError> {
        if !self.connected {
            return Err(MemBackendError::NotConnected);
        }
        let mut data = self.db.data.lock().await;
        f(&mut data)
    }
}

#[async_trait]
impl MigrationBackend for InMemoryBackend {
    type Error = MemBackendError;

    async fn ping(&mut self) -> Result<(), Self::Error> {
        self.with_data(|data| {
            if data.reachable {
                Ok(())
            } else {
                Err(MemBackendError::Unavailable)
            }
        })
        .await
    }

    async fn lock(&mut self) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MemBackendError::NotConnected);
        }
        if self.permit.is_none() {
            let permit = self
                .db
                .lock
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| MemBackendError::Unavailable)?;
            self.permit = Some(permit);
        }
        Ok(())
    }

    async fn unlock(&mut self) -> Result<bool, Self::Error> {
        Ok(self.permit.take().is_some())
    }

    async fn ensure_ledger(&mut self) -> Result<(), Self::Error> {
        self.with_data(|data| {
            data.ledger.get_or_insert_with(Vec::new);
            Ok(())
        })
        .await
    }

    async fn list_applied(&mut self) -> Result<Vec<MigrationRecord>, Self::Error> {
        self.with_data(|data| Ok(data.ledger_mut()?.clone())).await
    }

    async fn record_applied(
        &mut self,
        filename: &str,
        checksum: Option<&str>,
    ) -> Result<bool, Self::Error> {
        self.with_data(|data| data.record(filename, checksum)).await
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), Self::Error> {
        self.with_data(|data| data.execute(sql)).await
    }

    async fn apply_and_record(
        &mut self,
        filename: &str,
        sql: &str,
        checksum: Option<&str>,
    ) -> Result<bool, Self::Error> {
        self.with_data(|data| {
            // `execute` is all-or-nothing and the ledger is checked first, so
            // `record` cannot fail once the catalog has changed.
            data.ledger_mut()?;
            data.execute(sql)?;
            data.record(filename, checksum)
        })
        .await
    }

    async fn existing_tables(&mut self, names: &[&str]) -> Result<HashSet<String>, Self::Error> {
        self.with_data(|data| {
            Ok(names
                .iter()
                .filter(|name| data.tables.contains(&name.to_lowercase()))
                .map(|name| name.to_string())
                .collect())
        })
        .await
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.permit = None;
        if self.connected {
            self.connected = false;
            self.db.connections.fetch_sub(1, Ordering::SeqCst);
            log::debug!("Closed in-memory connection");
        }
        Ok(())
    }
}

impl Drop for InMemoryBackend {
    fn drop(&mut self) {
        if self.connected {
            self.db.connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
