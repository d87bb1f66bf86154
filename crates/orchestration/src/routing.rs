//! Routing decision types: [`Intent`] and [`RoutingResult`].

use serde::{Deserialize, Serialize};

use crate::{MergeRequestIid, TaskPriority, TaskType, WebhookEvent};

/// The classified automation action a webhook event should trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    AutoReview,
    OnDemandReview,
    IncrementalReview,
    Improve,
    AskCommand,
    IssueDiscussion,
    FeatureDev,
    HelpResponse,
    AcceptanceTracking,
}

impl Intent {
    /// Returns the stable snake_case name used in the event log and task
    /// result context.
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::AutoReview => "auto_review",
            Intent::OnDemandReview => "on_demand_review",
            Intent::IncrementalReview => "incremental_review",
            Intent::Improve => "improve",
            Intent::AskCommand => "ask_command",
            Intent::IssueDiscussion => "issue_discussion",
            Intent::FeatureDev => "feature_dev",
            Intent::HelpResponse => "help_response",
            Intent::AcceptanceTracking => "acceptance_tracking",
        }
    }

    /// The task type this intent produces, or `None` if the intent is handled
    /// outside the task pipeline.
    pub fn task_type(self) -> Option<TaskType> {
        match self {
            Intent::AutoReview
            | Intent::OnDemandReview
            | Intent::IncrementalReview
            | Intent::Improve => Some(TaskType::CodeReview),
            Intent::AskCommand | Intent::IssueDiscussion => Some(TaskType::IssueDiscussion),
            Intent::FeatureDev => Some(TaskType::FeatureDev),
            Intent::HelpResponse | Intent::AcceptanceTracking => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra data extracted during classification or intake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingMetadata {
    /// The quoted question of an `ask` command.
    pub question: Option<String>,
    /// The unrecognised command that produced a help response.
    pub unrecognized_command: Option<String>,
    /// The merge request resolved for a push event (branch lookup).
    pub merge_request_iid: Option<MergeRequestIid>,
}

/// The output of the router: what to do about one event.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingResult {
    pub intent: Intent,
    pub priority: TaskPriority,
    pub event: WebhookEvent,
    pub metadata: RoutingMetadata,
}

impl RoutingResult {
    /// Creates a result with empty metadata.
    pub fn new(intent: Intent, priority: TaskPriority, event: WebhookEvent) -> Self {
        Self {
            intent,
            priority,
            event,
            metadata: RoutingMetadata::default(),
        }
    }

    /// Attaches metadata.
    pub fn with_metadata(mut self, metadata: RoutingMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The merge request this result concerns: explicit on the event, or
    /// resolved during intake.
    pub fn merge_request_iid(&self) -> Option<MergeRequestIid> {
        self.event
            .merge_request_iid()
            .or(self.metadata.merge_request_iid)
    }

    /// The executor context a dispatched task starts with.
    pub fn executor_context(&self) -> Option<serde_json::Value> {
        let question = self.metadata.question.as_ref()?;
        Some(serde_json::json!({
            "intent": self.intent.as_str(),
            "question": question,
        }))
    }
}
