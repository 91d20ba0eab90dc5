use sentinel_core::prelude::*;
use sentinel_core::{SENTINEL_FILENAME, Status};
use sentinel_mem::{InMemoryDatabase, MemBackendError};
use std::cmp::Ordering;
use std::path::Path;
use tempfile::TempDir;

const INIT_SQL: &str = r#"
-- Users of the dashboard
CREATE TABLE users (
    id SERIAL PRIMARY KEY,
    email VARCHAR(255) UNIQUE NOT NULL
);
"#;

const ADD_AGENTS_SQL: &str = r#"
CREATE TABLE agents (id SERIAL PRIMARY KEY, name VARCHAR(100) NOT NULL);
CREATE TABLE alerts (id SERIAL PRIMARY KEY, severity VARCHAR(20) NOT NULL);
CREATE TABLE events (id SERIAL PRIMARY KEY, alert_id INT REFERENCES alerts(id));
CREATE TABLE messages (id SERIAL PRIMARY KEY, body TEXT NOT NULL);
CREATE TABLE audit_logs (id SERIAL PRIMARY KEY, action VARCHAR(100) NOT NULL);
"#;

const ADD_INDEX_SQL: &str = "CREATE INDEX idx_alerts_severity ON alerts (severity);";

fn setup() -> (TempDir, Layout) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::create_dir(dir.path().join("migrations")).expect("Failed to create migrations dir");
    let layout = Layout::rooted_at(dir.path());
    (dir, layout)
}

fn write_migration(layout: &Layout, name: &str, sql: &str) {
    std::fs::write(layout.migrations_dir.join(name), sql).expect("Failed to write migration");
}

fn write_file(path: &Path, sql: &str) {
    std::fs::write(path, sql).expect("Failed to write file");
}

fn ledger_names(records: &[MigrationRecord]) -> Vec<&str> {
    records.iter().map(|r| r.filename.as_str()).collect()
}

#[tokio::test]
async fn test_fresh_database_applies_files_in_order() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);
    let db = InMemoryDatabase::new();

    let report = MigrationRunner::new(db.connect(), layout.clone())
        .run()
        .await
        .expect("Should run migrations");

    assert_eq!(report.applied(), vec!["001_init.sql", "002_add_agents.sql"]);
    assert_eq!(report.state, RunState::Completed);
    assert!(!report.fallback_applied);

    let ledger = db.ledger().await;
    assert_eq!(ledger_names(&ledger), vec!["001_init.sql", "002_add_agents.sql"]);
    assert!(ledger[0].id < ledger[1].id);
    assert_eq!(ledger[0].checksum.as_deref().map(str::len), Some(64));

    assert_eq!(db.committed().await, vec![INIT_SQL, ADD_AGENTS_SQL]);
    assert_eq!(db.open_connections(), 0);
    assert!(!db.is_locked());
}

#[tokio::test]
async fn test_second_run_applies_nothing() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);
    let db = InMemoryDatabase::new();

    let first = MigrationRunner::new(db.connect(), layout.clone())
        .run()
        .await
        .expect("Should run migrations");
    assert_eq!(first.applied_count(), 2);

    let second = MigrationRunner::new(db.connect(), layout.clone())
        .run()
        .await
        .expect("Should run migrations again");
    assert_eq!(second.applied_count(), 0);
    assert_eq!(second.skipped_count(), 2);
    assert_eq!(second.state, RunState::Completed);

    assert_eq!(db.ledger().await.len(), 2);
    assert_eq!(db.committed().await.len(), 2);
}

#[tokio::test]
async fn test_added_file_is_the_only_one_applied() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);
    let db = InMemoryDatabase::new();

    MigrationRunner::new(db.connect(), layout.clone())
        .run()
        .await
        .expect("Should run migrations");

    write_migration(&layout, "003_add_index.sql", ADD_INDEX_SQL);
    let report = MigrationRunner::new(db.connect(), layout.clone())
        .run()
        .await
        .expect("Should run the new migration");

    assert_eq!(report.applied(), vec!["003_add_index.sql"]);
    let ledger = db.ledger().await;
    assert_eq!(
        ledger_names(&ledger),
        vec!["001_init.sql", "002_add_agents.sql", "003_add_index.sql"]
    );
}

#[tokio::test]
async fn test_files_apply_in_lexicographic_order_regardless_of_creation_order() {
    let (_dir, layout) = setup();
    write_migration(&layout, "010_add_index.sql", ADD_INDEX_SQL);
    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);
    write_migration(&layout, "001_init.sql", INIT_SQL);
    let db = InMemoryDatabase::new();

    let report = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect("Should run migrations");

    assert_eq!(
        report.applied(),
        vec!["001_init.sql", "002_add_agents.sql", "010_add_index.sql"]
    );
    assert_eq!(
        db.committed().await,
        vec![INIT_SQL, ADD_AGENTS_SQL, ADD_INDEX_SQL]
    );
}

#[tokio::test]
async fn test_non_sql_files_are_ignored() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);
    write_migration(&layout, "notes.txt", "DROP TABLE users;");
    write_migration(&layout, "003_draft.sql.bak", "DROP TABLE users;");
    let db = InMemoryDatabase::new();

    let report = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect("Should run migrations");

    assert_eq!(report.files.len(), 2);
    assert!(db.tables().await.contains(&"users".to_string()));
}

#[tokio::test]
async fn test_custom_order_is_used() {
    struct NewestFirst;

    impl MigrationOrder for NewestFirst {
        fn compare(&self, a: &MigrationFile, b: &MigrationFile) -> Ordering {
            b.filename.cmp(&a.filename)
        }
    }

    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);
    let db = InMemoryDatabase::new();

    let report = MigrationRunner::new(db.connect(), layout)
        .with_order(NewestFirst)
        .run()
        .await
        .expect("Should run migrations");

    assert_eq!(report.applied(), vec!["002_add_agents.sql", "001_init.sql"]);
}

#[tokio::test]
async fn test_no_files_fallback_applies_schema_once() {
    let (_dir, layout) = setup();
    write_file(
        &layout.schema_path,
        &format!("{}\n{}", INIT_SQL, ADD_AGENTS_SQL),
    );
    let db = InMemoryDatabase::new();

    let first = MigrationRunner::new(db.connect(), layout.clone())
        .run()
        .await
        .expect("Should apply the base schema");
    assert!(first.fallback_applied);
    assert_eq!(first.applied(), vec![SENTINEL_FILENAME]);
    assert_eq!(first.applied_count(), 1);
    assert_eq!(ledger_names(&db.ledger().await), vec![SENTINEL_FILENAME]);

    let second = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect("Should skip the base schema");
    assert!(!second.fallback_applied);
    assert_eq!(second.applied_count(), 0);
    assert_eq!(second.skipped_count(), 1);
    assert_eq!(db.ledger().await.len(), 1);
    assert_eq!(db.committed().await.len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinked_migrations_are_applied_instead_of_the_fallback() {
    let (dir, layout) = setup();
    let store = dir.path().join("mounted");
    std::fs::create_dir(&store).expect("Failed to create store dir");
    write_file(&store.join("001_init.sql"), INIT_SQL);
    write_file(&store.join("002_add_agents.sql"), ADD_AGENTS_SQL);
    for name in ["001_init.sql", "002_add_agents.sql"] {
        std::os::unix::fs::symlink(store.join(name), layout.migrations_dir.join(name))
            .expect("Failed to link migration");
    }
    write_file(&layout.schema_path, "CREATE TABLE unrelated (id INT);");
    let db = InMemoryDatabase::new();

    let report = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect("Should run linked migrations");

    assert!(!report.fallback_applied);
    assert_eq!(report.applied(), vec!["001_init.sql", "002_add_agents.sql"]);
    assert_eq!(
        ledger_names(&db.ledger().await),
        vec!["001_init.sql", "002_add_agents.sql"]
    );
    assert!(!db.tables().await.contains(&"unrelated".to_string()));
}

#[tokio::test]
async fn test_unreadable_migration_error_names_the_file() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    std::fs::write(layout.migrations_dir.join("002_binary.sql"), [0xff, 0xfe, 0x00])
        .expect("Failed to write migration");
    let db = InMemoryDatabase::new();

    let err = MigrationRunner::new(db.connect(), layout.clone())
        .run()
        .await
        .expect_err("Invalid UTF-8 cannot be read as SQL");

    match err {
        RunError::Io { path, .. } => {
            assert_eq!(path, layout.migrations_dir.join("002_binary.sql"));
        }
        other => panic!("Unexpected error: {}", other),
    }
    assert!(db.ledger().await.is_empty());
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_missing_migrations_directory_falls_back_to_schema() {
    let (dir, layout) = setup();
    std::fs::remove_dir(dir.path().join("migrations")).expect("Failed to remove dir");
    write_file(
        &layout.schema_path,
        &format!("{}\n{}", INIT_SQL, ADD_AGENTS_SQL),
    );
    let db = InMemoryDatabase::new();

    let report = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect("Should apply the base schema");

    assert!(report.fallback_applied);
}

#[tokio::test]
async fn test_no_files_and_no_schema_fails_verification() {
    let (_dir, layout) = setup();
    let db = InMemoryDatabase::new();

    let err = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect_err("Nothing creates the expected tables");

    match err {
        RunError::MissingTable { table, report } => {
            assert_eq!(table, "users");
            assert_eq!(report.state, RunState::Failed);
            assert!(!report.fallback_applied);
        }
        other => panic!("Unexpected error: {}", other),
    }
    assert!(db.ledger().await.is_empty());
    assert!(db.has_ledger().await);
}

#[tokio::test]
async fn test_missing_expected_table_fails_the_run() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    let db = InMemoryDatabase::new();

    let err = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect_err("agents is never created");

    match &err {
        RunError::MissingTable { table, report } => {
            assert_eq!(table, "agents");
            assert_eq!(report.applied(), vec!["001_init.sql"]);
        }
        other => panic!("Unexpected error: {}", other),
    }
    assert!(err.to_string().contains("agents"));

    // The applied migration stays recorded.
    assert_eq!(ledger_names(&db.ledger().await), vec!["001_init.sql"]);
    assert_eq!(db.open_connections(), 0);
    assert!(!db.is_locked());
}

#[tokio::test]
async fn test_table_dropped_after_migration_fails_next_run() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);
    let db = InMemoryDatabase::new();

    MigrationRunner::new(db.connect(), layout.clone())
        .run()
        .await
        .expect("Should run migrations");

    db.drop_table("audit_logs").await;
    let err = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect_err("audit_logs was dropped");

    assert!(matches!(err, RunError::MissingTable { ref table, .. } if table == "audit_logs"));
}

#[tokio::test]
async fn test_failing_migration_is_rolled_back_and_stops_the_run() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    write_migration(
        &layout,
        "002_add_agents.sql",
        "CREATE TABLE agents (id SERIAL PRIMARY KEY);\nSELECT explode();",
    );
    write_migration(&layout, "003_add_index.sql", ADD_INDEX_SQL);
    let db = InMemoryDatabase::new();
    db.fail_on("explode()").await;

    let err = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect_err("002 should fail");

    match &err {
        RunError::Execution {
            filename,
            source,
            report,
        } => {
            assert_eq!(filename, "002_add_agents.sql");
            assert!(matches!(source, MemBackendError::Injected { .. }));
            assert_eq!(report.state, RunState::Failed);
            assert_eq!(report.files.len(), 2);
            assert_eq!(report.files[0].outcome, FileOutcome::Applied);
            assert!(matches!(report.files[1].outcome, FileOutcome::Failed(_)));
        }
        other => panic!("Unexpected error: {}", other),
    }
    assert!(err.report().is_some());

    assert_eq!(ledger_names(&db.ledger().await), vec!["001_init.sql"]);
    assert!(!db.tables().await.contains(&"agents".to_string()));
    assert_eq!(db.open_connections(), 0);
    assert!(!db.is_locked());
}

#[tokio::test]
async fn test_failed_migration_is_retried_on_next_run() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    write_migration(&layout, "002_add_agents.sql", "SELECT explode();");
    let db = InMemoryDatabase::new();
    db.fail_on("explode").await;

    MigrationRunner::new(db.connect(), layout.clone())
        .run()
        .await
        .expect_err("002 should fail");

    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);
    let report = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect("Fixed migration should apply");

    assert_eq!(report.applied(), vec!["002_add_agents.sql"]);
    assert_eq!(report.skipped_count(), 1);
}

#[tokio::test]
async fn test_unreachable_database_does_no_work() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    let db = InMemoryDatabase::new();
    db.set_reachable(false).await;

    let err = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect_err("Database is down");

    assert!(matches!(err, RunError::Connectivity(MemBackendError::Unavailable)));
    assert!(err.report().is_none());
    assert!(!db.has_ledger().await);
    assert!(db.tables().await.is_empty());
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_orphaned_and_changed_files_are_reported_without_failing() {
    let (_dir, layout) = setup();
    write_migration(&layout, "000_extensions.sql", "CREATE EXTENSION IF NOT EXISTS pgcrypto;");
    write_migration(&layout, "001_init.sql", INIT_SQL);
    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);
    let db = InMemoryDatabase::new();

    MigrationRunner::new(db.connect(), layout.clone())
        .run()
        .await
        .expect("Should run migrations");

    std::fs::remove_file(layout.migrations_dir.join("000_extensions.sql"))
        .expect("Failed to remove migration");
    write_migration(&layout, "001_init.sql", "-- edited\nCREATE TABLE users (id INT);");

    let report = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect("Orphans and drift are warnings");

    assert_eq!(report.orphaned, vec!["000_extensions.sql".to_string()]);
    assert_eq!(report.drifted, vec!["001_init.sql".to_string()]);
    assert_eq!(report.applied_count(), 0);
    assert_eq!(db.ledger().await.len(), 3);
}

#[tokio::test]
async fn test_concurrent_runs_apply_each_file_once() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);
    let db = InMemoryDatabase::new();

    let (a, b) = tokio::join!(
        MigrationRunner::new(db.connect(), layout.clone()).run(),
        MigrationRunner::new(db.connect(), layout.clone()).run(),
    );
    let a = a.expect("First runner should succeed");
    let b = b.expect("Second runner should succeed");

    assert_eq!(a.applied_count() + b.applied_count(), 2);
    assert_eq!(db.ledger().await.len(), 2);
    assert_eq!(db.committed().await.len(), 2);
    assert!(!db.is_locked());
}

#[tokio::test]
async fn test_runs_without_lock_when_disabled() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);
    let db = InMemoryDatabase::new();

    let report = MigrationRunner::new(db.connect(), layout)
        .with_options(RunnerOptions { lock: false })
        .run()
        .await
        .expect("Should run migrations");

    assert_eq!(report.applied_count(), 2);
    assert!(!db.is_locked());
}

#[tokio::test]
async fn test_status_lists_pending_and_orphaned() {
    let (_dir, layout) = setup();
    write_migration(&layout, "001_init.sql", INIT_SQL);
    let db = InMemoryDatabase::new();

    let before: Status = MigrationRunner::new(db.connect(), layout.clone())
        .status()
        .await
        .expect("Should read status");
    assert!(before.applied.is_empty());
    assert_eq!(before.pending, vec!["001_init.sql".to_string()]);

    MigrationRunner::new(db.connect(), layout.clone())
        .run()
        .await
        .expect_err("Only users exists, verification fails");

    std::fs::remove_file(layout.migrations_dir.join("001_init.sql"))
        .expect("Failed to remove migration");
    write_migration(&layout, "002_add_agents.sql", ADD_AGENTS_SQL);

    let after = MigrationRunner::new(db.connect(), layout)
        .status()
        .await
        .expect("Should read status");
    assert_eq!(ledger_names(&after.applied), vec!["001_init.sql"]);
    assert_eq!(after.pending, vec!["002_add_agents.sql".to_string()]);
    assert_eq!(after.orphaned, vec!["001_init.sql".to_string()]);
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_bundled_database_layout_migrates_cleanly() {
    let _ = env_logger::builder().is_test(true).try_init();
    let layout = Layout::rooted_at(Path::new(env!("CARGO_MANIFEST_DIR")).join("../database"));
    let db = InMemoryDatabase::new();

    let report = MigrationRunner::new(db.connect(), layout)
        .run()
        .await
        .expect("Bundled migrations should verify");

    assert_eq!(
        report.applied(),
        vec!["001_init.sql", "002_add_agents.sql", "003_add_indexes.sql"]
    );
    for table in sentinel_core::EXPECTED_TABLES {
        assert!(db.tables().await.contains(&table.to_string()));
    }
}
