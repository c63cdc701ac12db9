//! Coordination CLI
//!
//! Runs the handoff optimizer and maintenance pass against a SQLite
//! coordination database and prints JSON on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Best agent for a workflow type
//! coordination --database coord.db select research
//!
//! # Plan moving a workflow to a POC agent
//! coordination plan-handoff wf-42 --from research-1 --target-type poc
//!
//! # Overload report, then a periodic maintenance loop
//! coordination rebalance
//! RUST_LOG=workflow_coordination=debug coordination watch --interval-secs 30
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use workflow_coordination::store::{CoordinationStore, SqliteStore};
use workflow_coordination::{CoordinationConfig, Coordinator};

const DEFAULT_DATABASE: &str = "coordination.db";

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (COORD_* environment variables still apply)
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database (overrides database_path from config)
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score candidates and print the best agent for a workflow type
    Select { workflow_type: String },

    /// Plan handing a workflow to the best agent of another type
    PlanHandoff {
        workflow_id: String,
        /// Agent currently holding the workflow
        #[arg(long = "from", default_value = "")]
        from_agent_id: String,
        #[arg(long)]
        target_type: String,
    },

    /// Print rebalance suggestions for overloaded agents
    Rebalance,

    /// Print the agent directory summary
    Summary,

    /// Run maintenance passes until interrupted, printing each report
    ///
    /// This process records no workflows of its own, so each pass writes no
    /// metric aggregates and the report carries rebalance suggestions only.
    Watch {
        /// Overrides maintenance.interval_secs
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("workflow_coordination=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => CoordinationConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CoordinationConfig::from_env(),
    };

    let database = args
        .database
        .clone()
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
    tracing::info!("Coordination database: {}", database.display());

    let store = Arc::new(
        SqliteStore::open(&database)
            .with_context(|| format!("Failed to open database {}", database.display()))?,
    );

    match args.command {
        Command::Select { workflow_type } => {
            let coordinator = Coordinator::new(store, config);
            let best = coordinator.handoff().select_best_agent(&workflow_type).await?;
            print_json(&best)?;
        }
        Command::PlanHandoff {
            workflow_id,
            from_agent_id,
            target_type,
        } => {
            let coordinator = Coordinator::new(store, config);
            let plan = coordinator
                .plan_handoff(&workflow_id, &from_agent_id, &target_type)
                .await?;
            print_json(&plan)?;
        }
        Command::Rebalance => {
            let coordinator = Coordinator::new(store, config);
            let suggestions = coordinator.handoff().rebalance_agents().await?;
            print_json(&suggestions)?;
        }
        Command::Summary => {
            let summary = store.agent_summary().await?;
            print_json(&summary)?;
        }
        Command::Watch { interval_secs } => {
            if let Some(secs) = interval_secs {
                config.maintenance.interval_secs = secs;
            }
            let cancel = CancellationToken::new();
            let coordinator = Coordinator::with_cancellation(store, config, cancel.clone());

            let shutdown = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, stopping");
                }
                shutdown.cancel();
            });

            coordinator
                .run_maintenance_with(cancel, |report| {
                    if let Err(e) = print_json(report) {
                        tracing::warn!("Failed to print maintenance report: {}", e);
                    }
                })
                .await;
        }
    }

    Ok(())
}
