//! # Notetaker Orchestrator Entry Point
//!
//! Runs the HTTP service (default) or one-off maintenance commands.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use notetaker::{
    config::ConfigLoader,
    db,
    server::{AppState, Clients, run_server},
    sync::SyncWindow,
    telemetry::init_tracing,
};

/// Schedules meeting notetakers from calendar events and reconciles their recordings.
#[derive(Debug, Parser)]
#[command(name = "notetaker")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP server and background workers.
    Serve,

    /// Apply pending database migrations and exit.
    Migrate,

    /// Pull and reconcile one user's calendar events.
    Sync {
        /// User to synchronize.
        #[arg(long)]
        user: Uuid,

        /// Days ahead of today to synchronize (defaults to the configured window).
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=365))]
        days: Option<i64>,
    },

    /// Remove orphaned recurring instances and collapse duplicate events.
    Dedup {
        /// Restrict the sweep to one user.
        #[arg(long)]
        user: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let conn = db::init_pool(&config).await?;
    db::migrate(&conn).await?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config, conn).await,
        Commands::Migrate => {
            tracing::info!("Migrations applied");
            Ok(())
        }
        Commands::Sync { user, days } => {
            let days = days.unwrap_or(config.sync.window_days);
            let clients = Clients::from_config(&config)?;
            let state = AppState::new(config, conn, clients);
            let report = state
                .synchronizer
                .sync(user, SyncWindow::from_today(Utc::now(), days))
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Dedup { user } => {
            let clients = Clients::from_config(&config)?;
            let state = AppState::new(config, conn, clients);
            let report = state.dedup_sweeper().sweep(user).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
