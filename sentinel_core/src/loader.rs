//! Schema and seed loaders.
//!
//! Both documents are single SQL batches at fixed paths. Either may be absent,
//! in which case the step is skipped and logged rather than failing.

use crate::backend::MigrationBackend;
use crate::config::Layout;
use crate::error::RunError;
use crate::source::read_optional;
use std::path::Path;

/// Result of applying an optional document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The document was found and executed.
    Applied,
    /// The document does not exist; nothing was executed.
    Missing,
}

/// Outcome of [`initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitReport {
    /// What happened to the schema document.
    pub schema: LoadOutcome,
    /// What happened to the seed document, `None` when seeding was not requested.
    pub seed: Option<LoadOutcome>,
}

async fn apply_document<B: MigrationBackend>(
    backend: &mut B,
    path: &Path,
    kind: &str,
) -> Result<LoadOutcome, RunError<B::Error>> {
    let sql = read_optional(path).await.map_err(|source| RunError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let Some(sql) = sql else {
        log::info!("No {} document at {}, skipping", kind, path.display());
        return Ok(LoadOutcome::Missing);
    };

    log::info!("Applying {} document {}...", kind, path.display());
    backend.execute_batch(&sql).await.map_err(|source| {
        log::error!("Applying {} document {} failed: {}", kind, path.display(), source);
        RunError::Execution {
            filename: path.display().to_string(),
            source,
            report: Box::default(),
        }
    })?;

    Ok(LoadOutcome::Applied)
}

/// Executes the base schema document, if present.
///
/// This does not consult or write the ledger. The runner's no-files fallback
/// is the path that records the schema.
pub async fn apply_schema<B: MigrationBackend>(
    backend: &mut B,
    layout: &Layout,
) -> Result<LoadOutcome, RunError<B::Error>> {
    apply_document(backend, &layout.schema_path, "schema").await
}

/// Executes the seed data document, if present.
pub async fn apply_seed<B: MigrationBackend>(
    backend: &mut B,
    layout: &Layout,
) -> Result<LoadOutcome, RunError<B::Error>> {
    apply_document(backend, &layout.seed_path, "seed").await
}

/// Standalone initializer: probes the connection, applies the schema and
/// optionally the seed, then closes the backend whatever the outcome.
pub async fn initialize<B: MigrationBackend>(
    mut backend: B,
    layout: &Layout,
    with_seed: bool,
) -> Result<InitReport, RunError<B::Error>> {
    let result = initialize_on(&mut backend, layout, with_seed).await;

    if let Err(e) = backend.close().await {
        log::warn!("Failed to close database connection: {}", e);
    }

    match &result {
        Ok(report) => log::info!(
            "Database initialized (schema: {:?}, seed: {:?})",
            report.schema,
            report.seed
        ),
        Err(e) => log::error!("Database initialization failed: {}", e),
    }

    result
}

async fn initialize_on<B: MigrationBackend>(
    backend: &mut B,
    layout: &Layout,
    with_seed: bool,
) -> Result<InitReport, RunError<B::Error>> {
    backend.ping().await.map_err(RunError::Connectivity)?;
    log::debug!("Database connection established");

    let schema = apply_schema(backend, layout).await?;
    let seed = if with_seed {
        Some(apply_seed(backend, layout).await?)
    } else {
        None
    };

    Ok(InitReport { schema, seed })
}
