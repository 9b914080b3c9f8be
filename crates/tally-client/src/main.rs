//! # tally
//!
//! Command-line front end for the billing tracker. Opens the local store,
//! connects the configured replica and runs one command against them.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use tally_client::commands::{backup, clients, dashboard, logs, sync};
use tally_client::{init_tracing, AppConfig, AppState};

/// How often `sync --watch` refreshes client statuses.
const WATCH_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile with the remote replica.
    Sync {
        /// Stay connected and apply live changes until interrupted.
        #[arg(short, long)]
        watch: bool,
    },
    /// Re-derive due status of every client.
    Refresh,
    /// Write clients and servers to a backup file.
    Export { file: PathBuf },
    /// Replace clients and servers with a backup file.
    Import { file: PathBuf },
    /// Print the audit log, newest first.
    Logs,
    /// Re-create the entity captured by a delete log.
    Recover { log_id: Uuid },
    /// Print dashboard figures.
    Summary,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::from_env();
    info!(
        tenant = %config.tenant_id,
        remote = config.remote_configured(),
        "Starting tally v{}",
        env!("CARGO_PKG_VERSION")
    );
    let state = AppState::open(&config).context("failed to open local store")?;

    match cli.command {
        Command::Sync { watch } => {
            let status = sync::initialize_sync(&state).await;
            println!("{status}");
            if watch {
                let stop = async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                    }
                };
                sync::watch(&state, WATCH_REFRESH_INTERVAL, stop, |s| println!("{s}")).await;
            }
        }
        Command::Refresh => {
            let changed = clients::refresh_statuses(&state)?;
            println!("{changed} client(s) updated");
        }
        Command::Export { file } => {
            backup::save_backup_to_file(&state, &file).await?;
            println!("Backup written to {}", file.display());
        }
        Command::Import { file } => {
            let stats = backup::import_backup_file(&state, &file)
                .await
                .with_context(|| format!("failed to import {}", file.display()))?;
            println!(
                "Imported {} client(s) and {} server(s)",
                stats.clients_imported, stats.servers_imported
            );
        }
        Command::Logs => {
            for log in logs::list_logs(&state)? {
                let flags = match (log.synced, log.recovered) {
                    (_, true) => " [recovered]",
                    (false, _) => " [local]",
                    _ => "",
                };
                println!(
                    "{}  {}  {:?}  {}{flags}",
                    log.timestamp.format("%Y-%m-%d %H:%M"),
                    log.id,
                    log.kind,
                    log.description
                );
            }
        }
        Command::Recover { log_id } => {
            sync::initialize_sync(&state).await;
            let recovered = logs::recover(&state, log_id).await?;
            println!("Recovered as {}", recovered.entity_id());
        }
        Command::Summary => {
            let summary = dashboard::summary(&state)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    state.engine.shutdown();
    Ok(())
}
