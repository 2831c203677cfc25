//! `entry-sync` command line.
//!
//! # Responsibility
//! - Drive the sync engine against a local database file and, optionally, a
//!   shared remote directory.
//! - Keep output line-oriented so it can be diffed in scripts.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use entry_sync_core::model::symptom::SymptomLog;
use entry_sync_core::{
    default_log_level, export_entries_json, init_logging, Clock, Entry, EntrySyncEngine,
    FsRemoteStore, SessionIdentity, SqliteEntryRepository, SyncConfig, SystemClock,
};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Offline-first symptom entry store", long_about = None)]
struct Args {
    /// Local SQLite database file
    #[clap(long, default_value = "entry_sync.db")]
    db: PathBuf,
    /// Shared directory acting as the remote mirror
    #[clap(long)]
    remote_dir: Option<PathBuf>,
    /// Signed-in user id; omit to work in the anonymous scope
    #[clap(long)]
    user: Option<String>,
    /// JSON config file
    #[clap(long)]
    config: Option<PathBuf>,
    /// Directory for rolling log files; logging is off when omitted
    #[clap(long)]
    log_dir: Option<PathBuf>,
    #[clap(long)]
    log_level: Option<String>,
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a symptom entry
    Add {
        #[clap(long)]
        symptom: String,
        #[clap(long)]
        severity: u8,
        #[clap(long, default_value = "")]
        notes: String,
        /// Reuse an id to overwrite an existing entry
        #[clap(long)]
        id: Option<Uuid>,
    },
    /// List entries of the active scope, newest first
    List {
        /// Print raw JSON payloads instead of a summary
        #[clap(long)]
        json: bool,
    },
    /// Delete one entry
    Delete { id: Uuid },
    /// Delete every entry of the active scope
    Clear,
    /// Run one reconciliation pass and print its report
    Sync,
    /// Write the active scope's entries to a JSON file
    Export { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(log_dir) = &args.log_dir {
        let level = args.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir).context("failed to initialize logging")?;
    }

    let config = match &args.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("failed to load config `{}`", path.display()))?,
        None => SyncConfig::default(),
    };
    let repo = SqliteEntryRepository::open(&args.db)
        .with_context(|| format!("failed to open database `{}`", args.db.display()))?;
    let identity = match &args.user {
        Some(user) => SessionIdentity::signed_in(user.clone()),
        None => SessionIdentity::anonymous(),
    };

    let mut engine = EntrySyncEngine::new(Arc::new(repo), Arc::new(identity), config.clone());
    if let Some(remote_dir) = &args.remote_dir {
        engine = engine.with_remote(Arc::new(FsRemoteStore::new(
            remote_dir.clone(),
            config.collection.clone(),
        )));
    }
    info!(
        "event=cli_start module=cli status=ok scope={} remote={}",
        engine.current_scope().scope,
        args.remote_dir.is_some()
    );

    let outcome = run(&engine, args.cmd).await;
    engine.flush_remote().await;
    engine.shutdown().await;
    outcome
}

async fn run(engine: &EntrySyncEngine, cmd: Command) -> Result<()> {
    match cmd {
        Command::Add {
            symptom,
            severity,
            notes,
            id,
        } => {
            let mut log = SymptomLog::new(symptom, severity);
            log.notes = notes;
            log.validate().context("invalid symptom")?;

            let payload = Entry::encode_payload(&log)?;
            let now = SystemClock.now_ms();
            let entry = match id {
                Some(id) => Entry::with_id(id, payload, now),
                None => Entry::new(payload, now),
            };
            let stored = engine.save(entry).await?;
            println!("saved id={} updated_at={}", stored.id, stored.updated_at);
        }
        Command::List { json } => {
            for entry in engine.fetch_entries().await? {
                if json {
                    println!("{}", String::from_utf8_lossy(&entry.payload));
                    continue;
                }
                let summary = entry
                    .decode_payload::<SymptomLog>()
                    .map(|log| format!("{} severity={}", log.display_name(), log.severity))
                    .unwrap_or_else(|_| format!("<{} byte payload>", entry.payload.len()));
                println!(
                    "{} created_at={} updated_at={} {}",
                    entry.id, entry.created_at, entry.updated_at, summary
                );
            }
        }
        Command::Delete { id } => {
            engine.delete(id).await?;
            println!("deleted id={id}");
        }
        Command::Clear => {
            engine.delete_all().await?;
            println!("cleared scope={}", engine.current_scope().scope);
        }
        Command::Sync => {
            let report = engine.reconcile().await?;
            println!(
                "scope={} outcome={} pulled={} pushed={} remote_deleted={} unchanged={} skipped={}",
                report.scope,
                report.outcome.as_str(),
                report.pulled,
                report.pushed,
                report.remote_deleted,
                report.unchanged,
                report.skipped
            );
        }
        Command::Export { path } => {
            if path.is_dir() {
                bail!("export path `{}` is a directory", path.display());
            }
            let entries = engine.fetch_entries().await?;
            let count = export_entries_json(&entries, &path)?;
            println!("exported entries={count} path={}", path.display());
        }
    }
    Ok(())
}
