//! `hookline run`: the long-running service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gitlab::GitLabClient;
use handlers::{Pipeline, Ports};
use orchestration::Timestamp;
use queue::{spawn_workers, LaneQueue};
use store::SqliteStore;

use crate::config::{CliConfig, SweepsSection};
use crate::inbound::Inbound;

/// Opens the database and applies the configured directory seed.
pub async fn open_store(config: &CliConfig) -> Result<SqliteStore> {
    let store = SqliteStore::open(&config.database)
        .with_context(|| format!("opening database {}", config.database.display()))?;
    for (project, external) in config.projects() {
        store.register_project(project, external).await?;
    }
    for (external, user) in config.users() {
        store.register_user(external, user).await?;
    }
    Ok(store)
}

/// Builds the port bundle around `store`, the GitLab client and `queue`.
pub fn ports(store: Arc<SqliteStore>, gitlab: Arc<GitLabClient>, queue: LaneQueue) -> Ports {
    Ports {
        tasks: store.clone(),
        event_log: store.clone(),
        dead_letters: store.clone(),
        directory: store,
        source_control: gitlab.clone(),
        launcher: gitlab.clone(),
        notifier: gitlab,
        queue: Arc::new(queue),
    }
}

pub async fn run(config: CliConfig) -> Result<()> {
    let store = Arc::new(open_store(&config).await?);
    let gitlab = Arc::new(GitLabClient::new(config.gitlab()?).context("building GitLab client")?);
    let queue = LaneQueue::new();
    let pipeline = Arc::new(
        Pipeline::new(&ports(store, gitlab, queue.clone()), &config.orchestrator())
            .context("compiling mention patterns")?,
    );

    let shutdown = CancellationToken::new();
    let workers = spawn_workers(&queue, pipeline.clone(), config.worker_counts(), &shutdown);
    let sweeps = tokio::spawn(sweep_loop(
        Arc::clone(&pipeline),
        config.sweeps.clone(),
        shutdown.clone(),
    ));
    info!(database = %config.database.display(), "Hookline running");

    read_inbound(&pipeline, &shutdown).await;

    info!("Shutting down");
    shutdown.cancel();
    queue.close().await;
    for worker in workers {
        worker.await.context("worker panicked")?;
    }
    sweeps.await.context("sweeper panicked")?;
    Ok(())
}

/// Feeds stdin lines to the pipeline until Ctrl-C. End of input does not
/// stop the service; queued work keeps running.
async fn read_inbound(pipeline: &Pipeline, shutdown: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut open = true;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    error!(%error, "Could not listen for Ctrl-C");
                }
                break;
            }
            _ = shutdown.cancelled() => break,
            line = lines.next_line(), if open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    let delivered = match Inbound::parse(&line) {
                        Ok(message) => message.deliver(pipeline).await,
                        Err(error) => Err(error),
                    };
                    if let Err(error) = delivered {
                        warn!(error = format!("{error:#}"), "Inbound message rejected");
                    }
                }
                Ok(None) => {
                    info!("Input closed; waiting for Ctrl-C");
                    open = false;
                }
                Err(error) => {
                    error!(%error, "Could not read input");
                    open = false;
                }
            },
        }
    }
}

/// Recovery on startup and then periodically; queue expiry periodically.
async fn sweep_loop(pipeline: Arc<Pipeline>, intervals: SweepsSection, shutdown: CancellationToken) {
    let mut recovery = tokio::time::interval(Duration::from_secs(intervals.recovery_interval_secs));
    let mut expiry = tokio::time::interval(Duration::from_secs(intervals.expiry_interval_secs));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = recovery.tick() => {
                if let Err(error) = pipeline.sweeper.recover(Timestamp::now()).await {
                    error!(%error, "Recovery sweep failed");
                }
            }
            _ = expiry.tick() => {
                if let Err(error) = pipeline.sweeper.expire_queued(Timestamp::now()).await {
                    error!(%error, "Expiry sweep failed");
                }
            }
        }
    }
}
