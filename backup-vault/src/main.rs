mod config;
mod db;
mod models;
mod services;
mod store;

use crate::config::VaultConfig;
use crate::db::connection::{close_pool, create_pool};
use crate::db::migrate::migrate;
use crate::services::clamav::ClamScanner;
use crate::services::db_backup::backup_database;
use crate::store::SqliteStore;
use backup_engine::transfer::progress::format_bytes;
use backup_engine::{
    utils, BackupEngine, BackupStore, ConflictStrategy, EngineContext, LogLevel, Progress,
    ProgressEvent, RestoreEngine, VerifyEngine, VerifyOptions,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Backup storage root (overrides config)
    #[arg(long, value_name = "DIR")]
    storage_root: Option<PathBuf>,

    /// Owner identity (defaults to the host name)
    #[arg(long)]
    identity: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up one or more `;`-separated source paths
    Backup {
        source: String,

        /// Display name (defaults to a timestamp)
        #[arg(long)]
        name: Option<String>,

        /// Store artifacts unencrypted
        #[arg(long)]
        no_encrypt: bool,

        /// Store artifacts uncompressed
        #[arg(long)]
        no_compress: bool,

        /// Back up every file instead of only changes
        #[arg(long)]
        full: bool,
    },

    /// Restore a backup into a target directory
    Restore {
        target: PathBuf,

        /// Backup id as recorded in the database
        #[arg(long = "id", required_unless_present = "from_dir", conflicts_with = "from_dir")]
        backup_id: Option<String>,

        /// Restore from a backup directory's manifest sidecar instead
        #[arg(long, value_name = "DIR")]
        from_dir: Option<PathBuf>,

        /// overwrite, rename or skip
        #[arg(long)]
        conflict: Option<ConflictStrategy>,

        /// Skip hash verification of restored files
        #[arg(long)]
        no_verify: bool,
    },

    /// Check a backup's artifacts and scan them for malware
    Verify {
        backup_id: String,

        /// Decrypt every artifact and compare plaintext hashes
        #[arg(long)]
        deep: bool,
    },

    /// List recorded backups, newest first
    List {
        /// Only backups of this exact source specification
        #[arg(long)]
        source: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the operation log, newest first
    Logs {
        /// info, warn or error
        #[arg(long)]
        level: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

impl Command {
    /// Commands that write to the database
    fn mutates(&self) -> bool {
        matches!(self, Command::Backup { .. } | Command::Restore { .. } | Command::Verify { .. })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let mut vault = VaultConfig::from_env();
    if let Some(path) = args.config {
        vault.config_file = Some(path);
    }
    if let Some(path) = args.db {
        vault.db_path = path;
    }
    if let Some(root) = args.storage_root {
        vault.storage_root = Some(root);
    }
    if let Some(identity) = args.identity {
        vault.identity = backup_engine::Identity::new(identity);
    }
    if let Some(level) = args.log_level {
        vault.log_level = Some(level);
    }

    let config = vault.engine_config()?;
    utils::logger::init(&config.log.level)?;
    tracing::debug!("Using database {} as {}", vault.db_path.display(), vault.identity);

    if args.command.mutates() {
        if let Err(e) = backup_database(&vault.db_path, &vault.data_dir()) {
            tracing::warn!("Failed to create database backup: {}", e);
        }
    }

    let pool = create_pool(&vault.db_path)?;
    migrate(&pool)?;
    let store: Arc<dyn BackupStore> = Arc::new(SqliteStore::new(pool.clone()));
    let ctx = EngineContext::new(config, store);
    let progress = Progress::new(log_progress);

    let code = run(args.command, &vault, ctx, &pool, &progress).await;
    close_pool(&pool);
    code
}

async fn run(
    command: Command,
    vault: &VaultConfig,
    ctx: EngineContext,
    pool: &db::connection::DbPool,
    progress: &Progress,
) -> anyhow::Result<ExitCode> {
    match command {
        Command::Backup {
            source,
            name,
            no_encrypt,
            no_compress,
            full,
        } => {
            let mut options = ctx.config.backup_options();
            options.name = name;
            options.encrypt &= !no_encrypt;
            options.compress &= !no_compress;
            options.incremental &= !full;

            let outcome = BackupEngine::new(ctx)
                .create_backup(&source, &options, &vault.identity, progress)
                .await?;
            print_json(&json!({
                "backup_id": outcome.backup_id,
                "name": outcome.manifest.name,
                "files_backed_up": outcome.files_backed_up,
                "files_failed": outcome.files_failed,
                "total_size": outcome.total_size,
                "failures": outcome.manifest.failed().map(|f| json!({
                    "file": f.unique_path,
                    "error": f.error,
                })).collect::<Vec<_>>(),
            }))?;
            Ok(if outcome.files_failed > 0 { ExitCode::from(2) } else { ExitCode::SUCCESS })
        }

        Command::Restore {
            target,
            backup_id,
            from_dir,
            conflict,
            no_verify,
        } => {
            let mut options = ctx.config.restore_options();
            if let Some(strategy) = conflict {
                options.conflict_strategy = strategy;
            }
            options.verify &= !no_verify;

            let engine = RestoreEngine::new(ctx);
            let outcome = match (backup_id, from_dir) {
                (_, Some(dir)) => {
                    engine
                        .restore_from_sidecar(&dir, &target, &options, &vault.identity, progress)
                        .await?
                }
                (Some(id), None) => engine.restore_backup(&id, &target, &options, progress).await?,
                (None, None) => anyhow::bail!("either --id or --from-dir is required"),
            };
            print_json(&outcome)?;
            Ok(if outcome.files_failed > 0 || outcome.mismatches() > 0 {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            })
        }

        Command::Verify { backup_id, deep } => {
            let scanner = Arc::new(ClamScanner::new(vault.clamscan.clone(), vault.scan_timeout));
            let report = VerifyEngine::new(ctx, scanner)
                .verify_backup(&backup_id, &VerifyOptions { deep }, progress)
                .await?;
            print_json(&report)?;
            Ok(if report.is_healthy() { ExitCode::SUCCESS } else { ExitCode::from(2) })
        }

        Command::List { source, limit } => {
            let records = BackupEngine::new(ctx)
                .list_backups(source.as_deref(), limit, &vault.identity)
                .await?;
            for record in &records {
                println!(
                    "{}  {}  {:>5} files  {:>10}  {}  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.id,
                    record.file_count,
                    format_bytes(record.size),
                    if record.encrypted { "encrypted" } else { "plain" },
                    record.name
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Logs { level, limit } => {
            let level = level.as_deref().map(parse_level).transpose()?;
            let identity = vault.identity.to_string();
            let pool = pool.clone();
            let entries = tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                models::log_entry::find_recent(&conn, &identity, level, limit)
            })
            .await
            .map_err(|e| anyhow::anyhow!(e))??;
            for entry in &entries {
                println!(
                    "{}  {:<5}  {:<7}  {}",
                    entry.created_at, entry.level, entry.category, entry.message
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_level(raw: &str) -> anyhow::Result<LogLevel> {
    match raw.to_ascii_lowercase().as_str() {
        "info" => Ok(LogLevel::Info),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => anyhow::bail!("unknown log level: {}", other),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn log_progress(event: &ProgressEvent) {
    match event {
        ProgressEvent::Detection {
            sources,
            to_backup,
            unchanged,
            total_bytes,
        } => tracing::info!(
            "Scanned {} source(s): {} to back up ({}), {} unchanged",
            sources,
            to_backup,
            format_bytes(*total_bytes),
            unchanged
        ),
        ProgressEvent::Init {
            backup_id,
            total_files,
        } => tracing::info!("Backup {}: {} files", backup_id, total_files),
        ProgressEvent::Backup(p) | ProgressEvent::Restore(p) | ProgressEvent::Verify(p) => {
            tracing::debug!(
                "[{}] {}/{} ({:.0}%) {}",
                event.phase(),
                p.processed,
                p.total,
                p.percent,
                p.file
            )
        }
        ProgressEvent::Complete { backup_id, files, .. } => {
            tracing::info!("{} complete: {} files", backup_id, files)
        }
        ProgressEvent::Error { message } => tracing::error!("{}", message),
    }
}
