//! Hookline CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `hookline.toml` and validate it.
//! 2. **Wire observability**: configure `tracing-subscriber` with a JSON layer
//!    and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OpenTelemetry OTLP
//!    exporter. All `tracing` spans and structured events emitted by every
//!    crate in the workspace flow through this layer.
//! 3. **Construct infrastructure**: open the SQLite store, build the GitLab
//!    client and the in-process lanes, and inject them into the handlers as
//!    a [`handlers::Ports`] bundle.
//! 4. **Run or operate**: `run` starts workers, sweeps and the inbound
//!    stream; the `task` and `dlq` subcommands inspect and act on stored
//!    state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use handlers::DeadLetterService;
use orchestration::{DeadLetterId, TaskId, TaskRepository, UserId};
use queue::LaneQueue;

mod config;
mod inbound;
mod service;
mod telemetry;

use config::CliConfig;

/// Hookline: webhook intake and task orchestration for GitLab.
#[derive(Parser, Debug)]
#[command(name = "hookline")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "hookline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the service, reading JSON-lines messages from stdin
    Run,

    /// Task inspection
    #[command(subcommand)]
    Task(TaskCommands),

    /// Dead-letter queue operations
    #[command(subcommand)]
    Dlq(DlqCommands),
}

#[derive(Subcommand, Debug)]
enum TaskCommands {
    /// Print a task as JSON
    Show {
        /// Task id
        id: u64,
    },
}

#[derive(Subcommand, Debug)]
enum DlqCommands {
    /// List dead-letter entries
    List {
        /// Include retried and dismissed entries
        #[arg(long)]
        all: bool,
    },

    /// Re-run a dead-lettered task as a fresh task
    Retry {
        /// Dead-letter entry id
        id: u64,

        /// User performing the retry
        #[arg(long)]
        actor: u64,
    },

    /// Acknowledge an entry without retrying it
    Dismiss {
        /// Dead-letter entry id
        id: u64,

        /// User performing the dismissal
        #[arg(long)]
        actor: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(&cli.config)?;

    let default_filter = match cli.command {
        Commands::Run => "info",
        _ => "warn",
    };
    let telemetry = telemetry::init(default_filter)?;

    let result = match cli.command {
        Commands::Run => service::run(config).await,
        Commands::Task(TaskCommands::Show { id }) => show_task(&config, TaskId::new(id)).await,
        Commands::Dlq(command) => dead_letters(&config, command).await,
    };

    telemetry.shutdown();
    result
}

async fn show_task(config: &CliConfig, id: TaskId) -> Result<()> {
    let store = service::open_store(config).await?;
    let task = TaskRepository::get(&store, id)
        .await?
        .with_context(|| format!("task {id} not found"))?;
    print_json(&task)
}

async fn dead_letters(config: &CliConfig, command: DlqCommands) -> Result<()> {
    let store = Arc::new(service::open_store(config).await?);
    // Jobs enqueued here die with the process; the running service's
    // recovery sweep picks up the Queued task instead.
    let dlq = DeadLetterService::new(store, Arc::new(LaneQueue::new()));

    match command {
        DlqCommands::List { all } => print_json(&dlq.list(all).await?),
        DlqCommands::Retry { id, actor } => {
            let task = dlq
                .retry(DeadLetterId::new(id), UserId::new(actor))
                .await?;
            print_json(&task)
        }
        DlqCommands::Dismiss { id, actor } => {
            let entry = dlq
                .dismiss(DeadLetterId::new(id), UserId::new(actor))
                .await?;
            print_json(&entry)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
