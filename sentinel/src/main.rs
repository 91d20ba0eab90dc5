//! Command-line entry point.
//!
//! ```text
//! DATABASE_URL=postgres://... sentinel migrate
//! DATABASE_URL=postgres://... sentinel init --seed
//! DATABASE_URL=postgres://... sentinel status
//! ```
//!
//! Exits with status 0 on success and 1 on any failure, after logging the error.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sentinel::pg::PgBackend;
use sentinel::{DatabaseConfig, Layout, MigrationRunner, RunnerOptions, SslMode, initialize};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Applies the schema, seed data and migrations for the dashboard database")]
#[command(version)]
struct Cli {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// TLS mode: disable, require or verify-full
    #[arg(long, env = "DATABASE_SSL_MODE", default_value = "disable")]
    ssl_mode: SslMode,

    /// Seconds to wait for a database connection
    #[arg(long, env = "DATABASE_ACQUIRE_TIMEOUT", default_value_t = 30)]
    acquire_timeout: u64,

    /// Directory containing schema.sql, seed.sql and migrations/
    #[arg(long, default_value = "database")]
    root: PathBuf,

    /// Schema document, overrides <root>/schema.sql
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Seed document, overrides <root>/seed.sql
    #[arg(long)]
    seed_file: Option<PathBuf>,

    /// Migrations directory, overrides <root>/migrations
    #[arg(long)]
    migrations_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations and verify the expected tables
    Migrate {
        /// Skip the advisory lock (only safe when a single runner exists)
        #[arg(long)]
        no_lock: bool,
    },
    /// Apply the schema document unconditionally, then optionally the seed
    Init {
        /// Also apply the seed document
        #[arg(long)]
        seed: bool,
    },
    /// List applied, pending and orphaned migrations
    Status,
}

impl Cli {
    fn database_config(&self) -> anyhow::Result<DatabaseConfig> {
        Ok(DatabaseConfig::new(self.database_url.clone())?
            .with_ssl_mode(self.ssl_mode)
            .with_acquire_timeout(Duration::from_secs(self.acquire_timeout)))
    }

    fn layout(&self) -> Layout {
        let mut layout = Layout::rooted_at(&self.root);
        if let Some(schema) = &self.schema {
            layout.schema_path = schema.clone();
        }
        if let Some(seed) = &self.seed_file {
            layout.seed_path = seed.clone();
        }
        if let Some(dir) = &self.migrations_dir {
            layout.migrations_dir = dir.clone();
        }
        layout
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.database_config()?;
    let layout = cli.layout();
    log::debug!("Using {:?} with {:?}", config, layout);

    let backend = PgBackend::connect(&config)
        .await
        .context("Could not connect to the database")?;

    match cli.command {
        Command::Migrate { no_lock } => {
            let report = MigrationRunner::new(backend, layout)
                .with_options(RunnerOptions { lock: !no_lock })
                .run()
                .await?;
            for filename in report.applied() {
                println!("applied  {}", filename);
            }
        }
        Command::Init { seed } => {
            initialize(backend, &layout, seed).await?;
        }
        Command::Status => {
            let status = MigrationRunner::new(backend, layout).status().await?;
            for record in &status.applied {
                println!(
                    "applied  {}  {}",
                    record.executed_at.to_rfc3339(),
                    record.filename
                );
            }
            for filename in &status.pending {
                println!("pending  {}", filename);
            }
            for filename in &status.orphaned {
                println!("orphaned {}", filename);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
