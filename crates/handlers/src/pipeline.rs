//! Wiring of the handlers against a set of ports.

use std::sync::Arc;

use orchestration::{
    DeadLetterRepository, Directory, EventLogRepository, JobQueue, Notifier, OrchestratorConfig,
    RunnerLauncher, SourceControl, TaskRepository,
};

use crate::dead_letter::DeadLetterService;
use crate::dedup::Deduplicator;
use crate::dispatcher::TaskDispatcher;
use crate::failure::FailureHandler;
use crate::intake::{TaskDispatchService, WebhookIntake};
use crate::jobs::JobRunner;
use crate::results::{ResultIntake, ResultProcessor};
use crate::router::Router;
use crate::sweeps::Sweeper;

/// Every infrastructure dependency of the pipeline.
#[derive(Clone)]
pub struct Ports {
    pub tasks: Arc<dyn TaskRepository>,
    pub event_log: Arc<dyn EventLogRepository>,
    pub dead_letters: Arc<dyn DeadLetterRepository>,
    pub directory: Arc<dyn Directory>,
    pub source_control: Arc<dyn SourceControl>,
    pub launcher: Arc<dyn RunnerLauncher>,
    pub notifier: Arc<dyn Notifier>,
    pub queue: Arc<dyn JobQueue>,
}

/// The assembled handlers.
pub struct Pipeline {
    pub intake: WebhookIntake,
    pub results: ResultIntake,
    pub runner: JobRunner,
    pub dead_letters: DeadLetterService,
    pub sweeper: Sweeper,
}

impl Pipeline {
    /// Builds every handler. Fails only if the configured mention cannot be
    /// compiled into a pattern.
    pub fn new(ports: &Ports, config: &OrchestratorConfig) -> Result<Self, regex::Error> {
        let failures = Arc::new(FailureHandler::new(
            Arc::clone(&ports.tasks),
            Arc::clone(&ports.dead_letters),
            Arc::clone(&ports.queue),
        ));

        let intake = WebhookIntake::new(
            Router::with_default_chain(config)?,
            Deduplicator::new(
                Arc::clone(&ports.tasks),
                Arc::clone(&ports.event_log),
                Arc::clone(&ports.source_control),
            ),
            TaskDispatchService::new(
                Arc::clone(&ports.tasks),
                Arc::clone(&ports.directory),
                Arc::clone(&ports.queue),
            ),
        );

        let runner = JobRunner::new(
            Arc::clone(&ports.tasks),
            Arc::clone(&ports.directory),
            Arc::clone(&ports.notifier),
            Arc::clone(&ports.queue),
            TaskDispatcher::new(
                Arc::clone(&ports.tasks),
                Arc::clone(&ports.directory),
                Arc::clone(&ports.source_control),
                Arc::clone(&ports.launcher),
                Arc::clone(&ports.queue),
                config.launch_claim_ttl(),
            ),
            ResultProcessor::new(Arc::clone(&ports.tasks)),
            Arc::clone(&failures),
            config.backoff.clone(),
        );

        Ok(Self {
            intake,
            results: ResultIntake::new(
                Arc::clone(&ports.tasks),
                Arc::clone(&ports.queue),
                Arc::clone(&failures),
            ),
            runner,
            dead_letters: DeadLetterService::new(
                Arc::clone(&ports.dead_letters),
                Arc::clone(&ports.queue),
            ),
            sweeper: Sweeper::new(
                Arc::clone(&ports.tasks),
                Arc::clone(&ports.queue),
                failures,
                config.queue_ttl,
                config.launch_claim_ttl(),
            ),
        })
    }
}
