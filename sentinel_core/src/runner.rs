//! The migration runner.
//!
//! A run takes the database from whatever state the ledger says it is in to
//! the latest known schema:
//!
//! 1. probe the connection and take the migration lock,
//! 2. create the ledger if needed and read it,
//! 3. discover `.sql` files and sort them with the configured [`MigrationOrder`],
//! 4. apply every file not yet in the ledger, each inside its own transaction
//!    together with its ledger row (or, with no files at all, apply the base
//!    schema under [`SENTINEL_FILENAME`]),
//! 5. verify the [`EXPECTED_TABLES`](crate::EXPECTED_TABLES) exist,
//! 6. unlock and close the backend, on every path.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sentinel_core::{Layout, MigrationRunner};
//!
//! let report = MigrationRunner::new(backend, Layout::default()).run().await?;
//! println!("Applied {} migrations", report.applied_count());
//! ```

use crate::backend::{MigrationBackend, MigrationRecord};
use crate::config::Layout;
use crate::error::RunError;
use crate::report::{FileOutcome, RunReport, RunState};
use crate::source::{
    Lexicographic, MigrationFile, MigrationOrder, checksum, discover, read_optional,
};
use crate::tables;
use std::collections::{HashMap, HashSet};

/// Ledger name the base schema is recorded under when no migration files exist.
pub const SENTINEL_FILENAME: &str = "schema.sql";

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Hold the database-wide migration lock for the whole run.
    ///
    /// Without it, two runners started at once may both execute a pending
    /// file; the ledger keeps a single row but the SQL runs twice.
    ///
    /// Default: `true`
    pub lock: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self { lock: true }
    }
}

/// Ledger contents compared with the files on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Every ledger row, oldest first.
    pub applied: Vec<MigrationRecord>,
    /// Files on disk not yet recorded, in application order.
    pub pending: Vec<String>,
    /// Ledger rows without a file on disk.
    pub orphaned: Vec<String>,
}

/// Applies SQL migration files through a [`MigrationBackend`].
///
/// The runner owns the backend and closes it when a run ends, so each runner
/// performs exactly one [`run`](Self::run) or [`status`](Self::status).
pub struct MigrationRunner<B, O = Lexicographic> {
    backend: B,
    layout: Layout,
    order: O,
    options: RunnerOptions,
    state: RunState,
}

impl<B: MigrationBackend> MigrationRunner<B, Lexicographic> {
    /// Creates a runner that applies files in filename order.
    pub fn new(backend: B, layout: Layout) -> Self {
        Self {
            backend,
            layout,
            order: Lexicographic,
            options: RunnerOptions::default(),
            state: RunState::NotStarted,
        }
    }
}

impl<B, O> MigrationRunner<B, O>
where
    B: MigrationBackend,
    O: MigrationOrder,
{
    /// Replaces the ordering used to sort discovered files.
    pub fn with_order<P: MigrationOrder>(self, order: P) -> MigrationRunner<B, P> {
        MigrationRunner {
            backend: self.backend,
            layout: self.layout,
            order,
            options: self.options,
            state: self.state,
        }
    }

    /// Replaces the run options.
    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    fn transition(&mut self, next: RunState) {
        log::debug!("Migration run: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Runs all pending migrations and verifies the expected tables.
    ///
    /// Each file is applied in its own transaction together with its ledger
    /// row. If a file fails, its transaction is rolled back, files applied
    /// before it stay committed and no later file is attempted.
    pub async fn run(mut self) -> Result<RunReport, RunError<B::Error>> {
        let mut report = RunReport::default();
        let mut locked = false;

        let result = self.drive(&mut report, &mut locked).await;
        self.release(locked).await;

        match result {
            Ok(()) => {
                self.transition(RunState::Completed);
                report.state = RunState::Completed;
                log::info!(
                    "Migrations complete: {} applied, {} already applied",
                    report.applied_count(),
                    report.skipped_count()
                );
                Ok(report)
            }
            Err(mut err) => {
                self.transition(RunState::Failed);
                if let RunError::Execution { report, .. } | RunError::MissingTable { report, .. } =
                    &mut err
                {
                    report.state = RunState::Failed;
                }
                log::error!("Migration run failed: {}", err);
                Err(err)
            }
        }
    }

    /// Reports applied, pending and orphaned migrations without applying anything.
    pub async fn status(mut self) -> Result<Status, RunError<B::Error>> {
        let result = self.inspect().await;
        self.release(false).await;
        result
    }

    async fn inspect(&mut self) -> Result<Status, RunError<B::Error>> {
        self.backend.ping().await.map_err(RunError::Connectivity)?;
        self.backend.ensure_ledger().await.map_err(RunError::Ledger)?;
        let applied = self.backend.list_applied().await.map_err(RunError::Ledger)?;
        let files = self.discover().await?;

        let recorded: HashSet<&str> = applied.iter().map(|r| r.filename.as_str()).collect();
        let on_disk: HashSet<&str> = files.iter().map(|f| f.filename.as_str()).collect();

        let pending = files
            .iter()
            .filter(|f| !recorded.contains(f.filename.as_str()))
            .map(|f| f.filename.clone())
            .collect();
        let orphaned = applied
            .iter()
            .filter(|r| r.filename != SENTINEL_FILENAME && !on_disk.contains(r.filename.as_str()))
            .map(|r| r.filename.clone())
            .collect();

        Ok(Status {
            applied,
            pending,
            orphaned,
        })
    }

    async fn discover(&self) -> Result<Vec<MigrationFile>, RunError<B::Error>> {
        discover(&self.layout.migrations_dir, &self.order)
            .await
            .map_err(|e| RunError::Io {
                path: e.path,
                source: e.source,
            })
    }

    async fn drive(
        &mut self,
        report: &mut RunReport,
        locked: &mut bool,
    ) -> Result<(), RunError<B::Error>> {
        self.backend.ping().await.map_err(RunError::Connectivity)?;

        if self.options.lock {
            self.backend.lock().await.map_err(RunError::Lock)?;
            *locked = true;
            log::debug!("Acquired migration lock");
        }

        self.backend.ensure_ledger().await.map_err(RunError::Ledger)?;
        let records = self.backend.list_applied().await.map_err(RunError::Ledger)?;
        self.transition(RunState::LedgerReady);

        let files = self.discover().await?;
        check_ledger(&records, &files, report);

        if files.is_empty() {
            self.transition(RunState::NoFilesFallback);
            self.apply_fallback(&records, report).await?;
        } else {
            self.transition(RunState::ApplyingFiles);
            self.apply_files(&records, &files, report).await?;
        }

        self.transition(RunState::Verifying);
        match tables::first_missing(&mut self.backend).await {
            Ok(None) => Ok(()),
            Ok(Some(table)) => Err(RunError::MissingTable {
                table: table.to_string(),
                report: Box::new(report.clone()),
            }),
            Err(source) => Err(RunError::Catalog(source)),
        }
    }

    async fn apply_files(
        &mut self,
        records: &[MigrationRecord],
        files: &[MigrationFile],
        report: &mut RunReport,
    ) -> Result<(), RunError<B::Error>> {
        let applied: HashSet<&str> = records.iter().map(|r| r.filename.as_str()).collect();

        for file in files {
            if applied.contains(file.filename.as_str()) {
                log::debug!("Skipping migration {}: already applied", file.filename);
                report.push(&file.filename, FileOutcome::Skipped);
                continue;
            }

            log::info!("Running migration {}...", file.filename);
            let checksum = file.checksum();
            match self
                .backend
                .apply_and_record(&file.filename, &file.sql, Some(&checksum))
                .await
            {
                Ok(inserted) => {
                    if !inserted {
                        log::warn!(
                            "Migration {} was recorded by another run while this one applied it",
                            file.filename
                        );
                    }
                    log::info!("Migration {} applied successfully", file.filename);
                    report.push(&file.filename, FileOutcome::Applied);
                }
                Err(source) => {
                    log::error!("Migration {} failed: {}", file.filename, source);
                    report.push(&file.filename, FileOutcome::Failed(source.to_string()));
                    return Err(RunError::Execution {
                        filename: file.filename.clone(),
                        source,
                        report: Box::new(report.clone()),
                    });
                }
            }
        }

        Ok(())
    }

    async fn apply_fallback(
        &mut self,
        records: &[MigrationRecord],
        report: &mut RunReport,
    ) -> Result<(), RunError<B::Error>> {
        if records.iter().any(|r| r.filename == SENTINEL_FILENAME) {
            log::info!(
                "No migration files found; base schema already recorded as {}",
                SENTINEL_FILENAME
            );
            report.push(SENTINEL_FILENAME, FileOutcome::Skipped);
            return Ok(());
        }

        let schema_path = &self.layout.schema_path;
        let sql = read_optional(schema_path)
            .await
            .map_err(|source| RunError::Io {
                path: schema_path.clone(),
                source,
            })?;

        let Some(sql) = sql else {
            log::warn!(
                "No migration files in {} and no schema document at {}",
                self.layout.migrations_dir.display(),
                schema_path.display()
            );
            return Ok(());
        };

        log::info!(
            "No migration files found in {}, applying base schema {}...",
            self.layout.migrations_dir.display(),
            schema_path.display()
        );
        match self
            .backend
            .apply_and_record(SENTINEL_FILENAME, &sql, Some(&checksum(&sql)))
            .await
        {
            Ok(_) => {
                report.fallback_applied = true;
                report.push(SENTINEL_FILENAME, FileOutcome::Applied);
                log::info!("Base schema applied and recorded as {}", SENTINEL_FILENAME);
                Ok(())
            }
            Err(source) => {
                log::error!("Base schema {} failed: {}", schema_path.display(), source);
                report.push(SENTINEL_FILENAME, FileOutcome::Failed(source.to_string()));
                Err(RunError::Execution {
                    filename: SENTINEL_FILENAME.to_string(),
                    source,
                    report: Box::new(report.clone()),
                })
            }
        }
    }

    async fn release(&mut self, locked: bool) {
        if locked {
            match self.backend.unlock().await {
                Ok(true) => log::debug!("Released migration lock"),
                Ok(false) => log::warn!("Migration lock was not held at release"),
                Err(e) => log::warn!("Failed to release migration lock: {}", e),
            }
        }
        if let Err(e) = self.backend.close().await {
            log::warn!("Failed to close database connection: {}", e);
        }
    }
}

/// Flags ledger rows whose file is gone and applied files that changed since.
fn check_ledger(records: &[MigrationRecord], files: &[MigrationFile], report: &mut RunReport) {
    let on_disk: HashMap<&str, &MigrationFile> =
        files.iter().map(|f| (f.filename.as_str(), f)).collect();

    for record in records {
        match on_disk.get(record.filename.as_str()) {
            None if record.filename == SENTINEL_FILENAME => {}
            None => {
                log::warn!(
                    "Ledger entry {} has no matching migration file",
                    record.filename
                );
                report.orphaned.push(record.filename.clone());
            }
            Some(file) => {
                let Some(recorded) = record.checksum.as_deref() else {
                    continue;
                };
                let current = file.checksum();
                if recorded != current {
                    log::warn!(
                        "Migration {} changed since it was applied (checksum {} -> {})",
                        record.filename,
                        recorded,
                        current
                    );
                    report.drifted.push(record.filename.clone());
                }
            }
        }
    }
}
