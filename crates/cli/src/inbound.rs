//! The JSON-lines inbound stream read by `hookline run`.
//!
//! Each line is one message:
//!
//! ```text
//! {"kind":"webhook","event_uuid":"...","context":{...}}
//! {"kind":"result","task_id":12,"payload":{...}}
//! {"kind":"failure","task_id":12,"reason":"scheduling_timeout","details":"..."}
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use handlers::Pipeline;
use orchestration::{EventContext, EventUuid, FailureReason, TaskId};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inbound {
    Webhook {
        #[serde(default)]
        event_uuid: Option<String>,
        context: EventContext,
    },
    Result {
        task_id: TaskId,
        payload: Value,
    },
    Failure {
        task_id: TaskId,
        reason: FailureReason,
        #[serde(default)]
        details: String,
    },
}

impl Inbound {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).context("malformed inbound message")
    }

    /// Hands the message to the matching entry point of the pipeline.
    pub async fn deliver(self, pipeline: &Pipeline) -> Result<()> {
        match self {
            Inbound::Webhook {
                event_uuid,
                context,
            } => {
                let uuid = event_uuid.and_then(EventUuid::new);
                if uuid.is_none() {
                    warn!(event_type = %context.event_type, "Webhook without delivery UUID; redelivery cannot be detected");
                }
                let outcome = pipeline.intake.handle(uuid.as_ref(), &context).await?;
                info!(?outcome, "Webhook handled");
            }
            Inbound::Result { task_id, payload } => {
                let outcome = pipeline.results.submit(task_id, payload).await?;
                info!(%task_id, ?outcome, "Result handled");
            }
            Inbound::Failure {
                task_id,
                reason,
                details,
            } => {
                let outcome = pipeline
                    .results
                    .report_failure(task_id, reason, &details)
                    .await?;
                info!(%task_id, %reason, ?outcome, "Failure report handled");
            }
        }
        Ok(())
    }
}
