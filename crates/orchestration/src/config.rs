//! Explicit configuration passed into each orchestration component.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BackoffSchedule, ExternalUserId};

/// Configuration consumed by the core pipeline.
///
/// Built once by the composition root and handed to each component at
/// construction; nothing in the core reads ambient configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// The automation's own account. Notes it authors are never routed.
    pub bot_account_id: Option<ExternalUserId>,
    /// The mention that addresses the bot in notes.
    pub mention: String,
    /// The issue label that requests feature development.
    pub develop_label: String,
    /// Retry delays for transient failures.
    pub backoff: BackoffSchedule,
    /// Queued tasks older than this are failed as expired.
    pub queue_ttl: Duration,
    /// Upper bound on one runner launch call.
    pub launch_timeout: Duration,
}

impl OrchestratorConfig {
    /// How long a launch claim shuts other jobs out: one launch call plus the
    /// longest back-off before the holder's next attempt.
    pub fn launch_claim_ttl(&self) -> Duration {
        self.launch_timeout.saturating_add(self.backoff.longest())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bot_account_id: None,
            mention: "@ai".to_string(),
            develop_label: "ai::develop".to_string(),
            backoff: BackoffSchedule::default(),
            queue_ttl: Duration::from_secs(2 * 60 * 60),
            launch_timeout: Duration::from_secs(30),
        }
    }
}
