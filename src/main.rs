// ABOUTME: Entry point for the initiative binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and runs record, backup, schedule and timer commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use initiative_core::{RECORD_TYPE_TAG, RecordKind};
use initiative_store::{
    BackendKind, ListenerError, SaveConfig, SaveEvent, SaveListener, SaveManager,
};
use initiative_timer::{TimerEvent, TimerOptions, TimerService};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "initiative")]
#[command(about = "Save, back up and restore combat tracker records, and run turn timers")]
#[command(version)]
struct Cli {
    /// Storage backend to use instead of INITIATIVE_BACKEND
    #[arg(short, long, global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List records of a type, newest first
    List {
        /// Record type (encounter, player, monster, settings, template, backup)
        kind: RecordKind,
    },
    /// Print one record with its metadata
    Show { kind: RecordKind, name: String },
    /// Export one record, or a whole type when no name is given
    Export {
        kind: RecordKind,
        name: Option<String>,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Import a single-record or collection export file
    Import { file: PathBuf },
    /// Delete one record
    Delete { kind: RecordKind, name: String },
    /// Snapshot every record into a new backup
    Backup,
    /// Re-save every record from a backup
    Restore { name: String },
    /// Keep the auto-save and backup schedules running until Ctrl-C
    Run {
        /// JSON file holding the current encounter state to auto-save
        #[arg(short, long)]
        state: Option<PathBuf>,
    },
    /// Count down a turn timer in the terminal
    Timer {
        /// Duration in seconds
        seconds: u64,
        /// Warn when this many seconds remain
        #[arg(short, long)]
        warning: Option<u64>,
    },
}

/// Supplies the contents of a JSON file as the state to auto-save.
struct FileState {
    path: PathBuf,
}

impl SaveListener for FileState {
    fn on_save_event(&self, _event: &SaveEvent) -> Result<(), ListenerError> {
        Ok(())
    }

    fn current_state(&self) -> Option<Value> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!("cannot read state file {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("state file {} is not valid JSON: {}", self.path.display(), e);
                None
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("initiative=info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Timer { seconds, warning } = cli.command {
        return run_timer(seconds, warning).await;
    }

    let mut config = SaveConfig::from_env()?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    tracing::info!(
        "initiative starting with {} backend at {}",
        config.backend,
        config.home.display()
    );

    let manager = config.build_manager().await?;
    if !manager.is_backend_available(manager.default_backend()) {
        bail!(
            "{} backend is unavailable; set INITIATIVE_FALLBACK_BACKEND or choose another with --backend",
            manager.default_backend()
        );
    }

    match cli.command {
        Commands::List { kind } => list(&manager, kind).await?,
        Commands::Show { kind, name } => {
            let record = manager.load_data(kind, &name, None).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Export { kind, name, out } => {
            let json = match name {
                Some(name) => manager.export_record(kind, &name).await?,
                None => manager.export_collection(kind).await?,
            };
            match out {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("exported {} to {}", kind, path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Import { file } => import(&manager, &file).await?,
        Commands::Delete { kind, name } => {
            manager.delete_data(kind, &name, None).await?;
            println!("deleted {kind} {name}");
        }
        Commands::Backup => {
            let backup = manager.create_backup().await?;
            println!("created backup {}", backup.meta.name);
        }
        Commands::Restore { name } => {
            let restored = manager.restore_backup(&name).await?;
            println!("restored {restored} records from {name}");
        }
        Commands::Run { state } => run_schedules(manager, state).await?,
        Commands::Timer { .. } => unreachable!("handled before the store is opened"),
    }

    Ok(())
}

async fn list(manager: &SaveManager, kind: RecordKind) -> Result<()> {
    let summaries = manager.summaries(kind, None).await?;
    if summaries.is_empty() {
        println!("no {} saved", kind.plural());
        return Ok(());
    }
    for summary in summaries {
        println!(
            "{}  {}  v{}{}",
            summary.date.format("%Y-%m-%d %H:%M:%S"),
            summary.name,
            summary.version,
            if summary.is_auto_save { "  (auto-save)" } else { "" }
        );
    }
    Ok(())
}

async fn import(manager: &SaveManager, file: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    if is_collection_export(&text) {
        let count = manager.import_collection_json(&text).await?;
        println!("imported {count} records from {}", file.display());
    } else {
        let (kind, record) = manager.import_json(&text).await?;
        println!("imported {} {}", kind, record.meta.name);
    }
    Ok(())
}

/// A collection export carries `exportDate` and no `recordType` tag. Single
/// record exports are always tagged, even when the record (a backup, say)
/// has its own `exportDate`.
fn is_collection_export(text: &str) -> bool {
    serde_json::from_str::<Value>(text).is_ok_and(|value| {
        value.get(RECORD_TYPE_TAG).is_none() && value.get("exportDate").is_some()
    })
}

async fn run_schedules(manager: SaveManager, state: Option<PathBuf>) -> Result<()> {
    let manager = Arc::new(manager);
    if let Some(path) = state {
        manager.add_listener(Arc::new(FileState { path }));
    }
    manager.add_listener_fn(|event| match event.error() {
        Some(error) => tracing::warn!("{}: {}", event.name(), error),
        None => tracing::info!("{}", event.name()),
    });

    let schedules = manager.start_schedules();
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    schedules.stop();
    tracing::info!("schedules stopped");
    Ok(())
}

async fn run_timer(seconds: u64, warning: Option<u64>) -> Result<()> {
    let service = TimerService::new();
    let mut events = service.subscribe();

    let mut options = TimerOptions::new(Duration::from_secs(seconds));
    if let Some(warning) = warning {
        options = options.warning(Duration::from_secs(warning));
    }
    let id = service.create_timer(Some("turn"), options)?;
    service.start_timer(&id)?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(TimerEvent::Tick(snapshot)) => {
                    println!("{:>4}s remaining", snapshot.remaining.as_secs());
                }
                Ok(TimerEvent::Warning(snapshot)) => {
                    println!("warning: {}s left", snapshot.remaining.as_secs());
                }
                Ok(TimerEvent::Completed(_)) => {
                    println!("time is up");
                    return Ok(());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("timer display skipped {} events", n);
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                let snapshot = service.cancel_timer(&id)?;
                println!("cancelled with {}s remaining", snapshot.remaining.as_secs());
                return Ok(());
            }
        }
    }
}
