use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use handlers::{JobOutcome, Pipeline};
use orchestration::{Envelope, Lane};

use crate::lanes::LaneQueue;

/// Executes one envelope taken from a lane.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, lane: Lane, envelope: Envelope) -> JobOutcome;
}

#[async_trait]
impl JobHandler for Pipeline {
    async fn handle(&self, lane: Lane, envelope: Envelope) -> JobOutcome {
        self.runner.run(lane, envelope).await
    }
}

/// A single consumer bound to an ordered set of lanes.
pub struct Worker {
    name: String,
    lanes: Vec<Lane>,
    queue: LaneQueue,
    handler: Arc<dyn JobHandler>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        lanes: &[Lane],
        queue: LaneQueue,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            lanes: lanes.to_vec(),
            queue,
            handler,
        }
    }

    /// Runs until `shutdown` fires or the queue closes. A job already in
    /// progress is finished before the worker exits.
    #[instrument(skip_all, fields(worker = %self.name))]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(lanes = ?self.lanes, "Worker started");
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.queue.next(&self.lanes) => next,
            };
            let Some((lane, envelope)) = next else {
                break;
            };
            let outcome = self.handler.handle(lane, envelope).await;
            debug!(queue = %lane, ?outcome, "Job finished");
        }
        info!("Worker stopped");
    }
}

/// How many workers to start per lane group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerCounts {
    pub runner: usize,
    pub server: usize,
}

impl Default for WorkerCounts {
    fn default() -> Self {
        Self {
            runner: 2,
            server: 1,
        }
    }
}

/// Spawns runner workers on the high/normal/low lanes and server workers on
/// the server lane.
pub fn spawn_workers(
    queue: &LaneQueue,
    handler: Arc<dyn JobHandler>,
    counts: WorkerCounts,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    const RUNNER: &[Lane] = &Lane::RUNNER;
    const SERVER: &[Lane] = &[Lane::Server];

    let runners = (0..counts.runner).map(|i| (format!("runner-{i}"), RUNNER));
    let servers = (0..counts.server).map(|i| (format!("server-{i}"), SERVER));

    runners
        .chain(servers)
        .map(|(name, lanes)| {
            let worker = Worker::new(name, lanes, queue.clone(), Arc::clone(&handler));
            tokio::spawn(worker.run(shutdown.clone()))
        })
        .collect()
}
