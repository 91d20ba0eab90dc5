//! Migration file discovery.
//!
//! Files are read from a single directory, filtered to the `.sql` extension
//! and sorted with a [`MigrationOrder`]. The default order, [`Lexicographic`],
//! compares filenames byte by byte: `010_x.sql` runs after `009_y.sql` only
//! because the numeric prefixes are zero-padded to the same width.

use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

/// A file or directory that could not be read during discovery.
#[derive(Debug, thiserror::Error)]
#[error("Could not read {}: {source}", path.display())]
pub struct SourceError {
    /// The entry being read when the error occurred.
    pub path: PathBuf,
    /// The underlying I/O error.
    #[source]
    pub source: io::Error,
}

impl SourceError {
    fn at(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The extension a file must carry to be treated as a migration.
pub const SQL_EXTENSION: &str = "sql";

/// A migration file read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// The bare filename, used as the ledger key.
    pub filename: String,
    /// Full path the file was read from.
    pub path: PathBuf,
    /// The complete SQL batch.
    pub sql: String,
}

impl MigrationFile {
    /// Builds a migration file from an in-memory document.
    pub fn new(filename: impl Into<String>, sql: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            path: PathBuf::from(&filename),
            filename,
            sql: sql.into(),
        }
    }

    /// SHA-256 of the file content, lowercase hex.
    pub fn checksum(&self) -> String {
        checksum(&self.sql)
    }
}

/// Returns the SHA-256 of `sql` as 64 lowercase hex characters.
pub fn checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Decides the order in which pending migrations are applied.
///
/// Later migrations may depend on the schema left by earlier ones, so the
/// order must be total and stable across runs.
pub trait MigrationOrder: Send + Sync {
    /// Compares two migration files.
    fn compare(&self, a: &MigrationFile, b: &MigrationFile) -> Ordering;
}

/// Orders migrations by filename, byte-wise.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lexicographic;

impl MigrationOrder for Lexicographic {
    fn compare(&self, a: &MigrationFile, b: &MigrationFile) -> Ordering {
        a.filename.as_bytes().cmp(b.filename.as_bytes())
    }
}

fn has_sql_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SQL_EXTENSION))
}

/// Sorts `files` with `order` and drops repeated filenames, keeping the first.
pub fn arrange(mut files: Vec<MigrationFile>, order: &dyn MigrationOrder) -> Vec<MigrationFile> {
    let mut seen = HashSet::new();
    files.retain(|file| {
        let fresh = seen.insert(file.filename.clone());
        if !fresh {
            log::warn!("Ignoring duplicate migration file {}", file.filename);
        }
        fresh
    });
    files.sort_by(|a, b| order.compare(a, b));
    files
}

/// Reads every `.sql` file in `dir`, sorted with `order`.
///
/// A missing directory yields an empty list. Subdirectories are not visited.
/// Symlinks are followed, so a link to a regular file counts as a migration.
pub async fn discover(
    dir: &Path,
    order: &dyn MigrationOrder,
) -> Result<Vec<MigrationFile>, SourceError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("Migrations directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(SourceError::at(dir)(e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(SourceError::at(dir))? {
        let path = entry.path();
        if !has_sql_extension(&path) {
            continue;
        }
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(SourceError::at(&path))?;
        if !metadata.is_file() {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            log::warn!("Skipping migration with non UTF-8 name: {}", path.display());
            continue;
        };
        let sql = tokio::fs::read_to_string(&path)
            .await
            .map_err(SourceError::at(&path))?;
        files.push(MigrationFile {
            filename: filename.to_string(),
            path: path.clone(),
            sql,
        });
    }

    Ok(arrange(files, order))
}

/// Reads a document that is allowed to be absent.
pub async fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(sql) => Ok(Some(sql)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
