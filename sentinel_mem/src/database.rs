use chrono::Utc;
use sentinel_core::MigrationRecord;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Semaphore};

use crate::backend::InMemoryBackend;

/// Name of the ledger table, as reported in error messages.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// Errors returned by the in-memory backend.
#[derive(Debug, thiserror::Error)]
pub enum MemBackendError {
    /// A statement matched a fragment registered with [`InMemoryDatabase::fail_on`].
    #[error("Injected failure on statement: {statement}")]
    Injected {
        /// The statement that was rejected.
        statement: String,
    },
    /// A statement is invalid for the current catalog.
    #[error("{reason}: {statement}")]
    Statement {
        /// The rejected statement.
        statement: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The database was marked unreachable.
    #[error("Database is unreachable")]
    Unavailable,
    /// The backend was used after `close`.
    #[error("Connection is closed")]
    NotConnected,
}

/// Mutable state behind an [`InMemoryDatabase`].
#[derive(Debug)]
pub(crate) struct MemDatabase {
    pub(crate) tables: BTreeSet<String>,
    pub(crate) ledger: Option<Vec<MigrationRecord>>,
    pub(crate) next_id: i64,
    pub(crate) committed: Vec<String>,
    pub(crate) fail_on: Vec<String>,
    pub(crate) reachable: bool,
}

/// A shared, in-memory database.
///
/// Cloning yields another handle to the same data. Each call to
/// [`connect`](Self::connect) hands out a backend that behaves like one
/// checked-out connection.
#[derive(Clone, Debug)]
pub struct InMemoryDatabase {
    pub(crate) data: Arc<Mutex<MemDatabase>>,
    pub(crate) lock: Arc<Semaphore>,
    pub(crate) connections: Arc<AtomicUsize>,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDatabase {
    /// Creates an empty database: no tables, no ledger.
    pub fn new() -> Self {
        log::debug!("Creating a new InMemoryDatabase");
        Self {
            data: Arc::new(Mutex::new(MemDatabase {
                tables: BTreeSet::new(),
                ledger: None,
                next_id: 1,
                committed: Vec::new(),
                fail_on: Vec::new(),
                reachable: true,
            })),
            lock: Arc::new(Semaphore::new(1)),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Opens a connection to this database.
    pub fn connect(&self) -> InMemoryBackend {
        InMemoryBackend::new(self.clone())
    }

    /// Makes every statement containing `fragment` (case-insensitive) fail.
    pub async fn fail_on(&self, fragment: &str) {
        self.data.lock().await.fail_on.push(fragment.to_lowercase());
    }

    /// Controls whether connectivity probes succeed.
    pub async fn set_reachable(&self, reachable: bool) {
        self.data.lock().await.reachable = reachable;
    }

    /// Creates a table directly, bypassing the backend.
    pub async fn create_table(&self, name: &str) {
        self.data.lock().await.tables.insert(name.to_lowercase());
    }

    /// Drops a table directly, bypassing the backend.
    pub async fn drop_table(&self, name: &str) {
        self.data.lock().await.tables.remove(&name.to_lowercase());
    }

    /// All table names, sorted.
    pub async fn tables(&self) -> Vec<String> {
        self.data.lock().await.tables.iter().cloned().collect()
    }

    /// Ledger rows, oldest first. Empty if the ledger table does not exist.
    pub async fn ledger(&self) -> Vec<MigrationRecord> {
        self.data.lock().await.ledger.clone().unwrap_or_default()
    }

    /// Whether the ledger table has been created.
    pub async fn has_ledger(&self) -> bool {
        self.data.lock().await.ledger.is_some()
    }

    /// SQL batches that committed, in commit order.
    pub async fn committed(&self) -> Vec<String> {
        self.data.lock().await.committed.clone()
    }

    /// Connections handed out and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Whether some connection currently holds the migration lock.
    pub fn is_locked(&self) -> bool {
        self.lock.available_permits() == 0
    }
}

impl MemDatabase {
    /// Applies every statement of `sql` to a copy of the catalog and swaps it in
    /// only if all of them succeed.
    pub(crate) fn execute(&mut self, sql: &str) -> Result<(), MemBackendError> {
        let mut tables = self.tables.clone();
        for statement in split_statements(sql) {
            self.execute_statement(&mut tables, &statement)?;
        }
        self.tables = tables;
        self.committed.push(sql.to_string());
        Ok(())
    }

    fn execute_statement(
        &self,
        tables: &mut BTreeSet<String>,
        statement: &str,
    ) -> Result<(), MemBackendError> {
        let lowered = statement.to_lowercase();
        if self.fail_on.iter().any(|f| lowered.contains(f.as_str())) {
            return Err(MemBackendError::Injected {
                statement: statement.to_string(),
            });
        }

        let words: Vec<&str> = lowered.split_whitespace().collect();
        match words.as_slice() {
            ["create", "table", "if", "not", "exists", name, ..] => {
                tables.insert(table_name(name));
            }
            ["create", "table", name, ..] => {
                if !tables.insert(table_name(name)) {
                    return Err(MemBackendError::Statement {
                        statement: statement.to_string(),
                        reason: format!("relation \"{}\" already exists", table_name(name)),
                    });
                }
            }
            ["drop", "table", "if", "exists", name, ..] => {
                tables.remove(&table_name(name));
            }
            ["drop", "table", name, ..] => {
                if !tables.remove(&table_name(name)) {
                    return Err(MemBackendError::Statement {
                        statement: statement.to_string(),
                        reason: format!("table \"{}\" does not exist", table_name(name)),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn ledger_mut(&mut self) -> Result<&mut Vec<MigrationRecord>, MemBackendError> {
        self.ledger.as_mut().ok_or_else(|| MemBackendError::Statement {
            statement: format!("SELECT * FROM {}", LEDGER_TABLE),
            reason: format!("relation \"{}\" does not exist", LEDGER_TABLE),
        })
    }

    /// Inserts a ledger row unless `filename` is already recorded.
    pub(crate) fn record(
        &mut self,
        filename: &str,
        checksum: Option<&str>,
    ) -> Result<bool, MemBackendError> {
        let id = self.next_id;
        let ledger = self.ledger_mut()?;
        if ledger.iter().any(|r| r.filename == filename) {
            return Ok(false);
        }
        ledger.push(MigrationRecord {
            id,
            filename: filename.to_string(),
            executed_at: Utc::now(),
            checksum: checksum.map(str::to_string),
        });
        self.next_id += 1;
        Ok(true)
    }
}

/// Splits a batch on `;`, dropping `--` comment lines and empty statements.
fn split_statements(sql: &str) -> impl Iterator<Item = String> + '_ {
    sql.split(';')
        .map(|s| {
            s.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|s| !s.is_empty())
}

/// Normalizes a table token: strips the column list, quotes and schema prefix.
fn table_name(token: &str) -> String {
    let token = token.split('(').next().unwrap_or(token);
    let token = token.rsplit('.').next().unwrap_or(token);
    token.trim_matches('"').to_string()
}
