//! Event Router: raw context → typed event → bot-loop filter → classifier
//! chain → [`RoutingResult`].
//!
//! The router is a pure transform. It performs no storage writes and no
//! external calls; resolving a push event's merge request is left to the
//! deduplicator.

use regex::Regex;
use tracing::debug;

use orchestration::{
    EventContext, EventKind, ExternalUserId, Intent, OrchestratorConfig, RoutingMetadata,
    RoutingResult, TaskPriority, WebhookEvent,
};

/// What a classifier decided about an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub intent: Intent,
    pub priority: TaskPriority,
    pub metadata: RoutingMetadata,
}

impl Classification {
    pub fn new(intent: Intent, priority: TaskPriority) -> Self {
        Self {
            intent,
            priority,
            metadata: RoutingMetadata::default(),
        }
    }
}

/// One link of the classifier chain.
///
/// A classifier either claims an event or declines it by returning `None`.
pub trait IntentClassifier: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn classify(&self, event: &WebhookEvent) -> Option<Classification>;
}

// ---------------------------------------------------------------------------
// Mention matching
// ---------------------------------------------------------------------------

/// Compiled patterns for the bot mention and its commands.
#[derive(Debug, Clone)]
pub struct Mention {
    text: String,
    any: Regex,
    ask: Regex,
    review: Regex,
    improve: Regex,
    command: Regex,
}

impl Mention {
    /// Compiles the patterns for `mention` (e.g. `@ai`).
    pub fn new(mention: &str) -> Result<Self, regex::Error> {
        let m = regex::escape(mention);
        Ok(Self {
            text: mention.to_string(),
            any: Regex::new(&format!(r"(?i){m}\b"))?,
            ask: Regex::new(&format!(r#"{m}\s+ask\s+"([^"]+)""#))?,
            review: Regex::new(&format!(r"(?i){m}\s+review\b"))?,
            improve: Regex::new(&format!(r"(?i){m}\s+improve\b"))?,
            command: Regex::new(&format!(r"{m}\s+(\S+)"))?,
        })
    }

    /// Returns `true` if `text` addresses the bot.
    pub fn is_mentioned(&self, text: &str) -> bool {
        self.any.is_match(text)
    }

    /// The quoted question of an `ask` command.
    pub fn question(&self, text: &str) -> Option<String> {
        self.ask
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// The mention plus the token after it, or the bare mention.
    pub fn unrecognized_command(&self, text: &str) -> String {
        match self.command.captures(text).and_then(|c| c.get(1)) {
            Some(token) => format!("{} {}", self.text, token.as_str()),
            None => self.text.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default classifiers
// ---------------------------------------------------------------------------

/// MR opened/updated → `auto_review`; merged → `acceptance_tracking`.
pub struct MergeRequestLifecycleClassifier;

impl IntentClassifier for MergeRequestLifecycleClassifier {
    fn name(&self) -> &'static str {
        "merge_request_lifecycle"
    }

    fn classify(&self, event: &WebhookEvent) -> Option<Classification> {
        match event.kind {
            EventKind::MergeRequestOpened(_) | EventKind::MergeRequestUpdated(_) => Some(
                Classification::new(Intent::AutoReview, TaskPriority::Normal),
            ),
            EventKind::MergeRequestMerged(_) => Some(Classification::new(
                Intent::AcceptanceTracking,
                TaskPriority::Normal,
            )),
            _ => None,
        }
    }
}

/// Bot commands in merge request notes.
pub struct MergeRequestNoteClassifier {
    mention: Mention,
}

impl MergeRequestNoteClassifier {
    pub fn new(mention: Mention) -> Self {
        Self { mention }
    }
}

impl IntentClassifier for MergeRequestNoteClassifier {
    fn name(&self) -> &'static str {
        "merge_request_note"
    }

    fn classify(&self, event: &WebhookEvent) -> Option<Classification> {
        let EventKind::NoteOnMergeRequest { note, .. } = &event.kind else {
            return None;
        };
        if !self.mention.is_mentioned(note) {
            return None;
        }

        if let Some(question) = self.mention.question(note) {
            let mut classification = Classification::new(Intent::AskCommand, TaskPriority::Normal);
            classification.metadata.question = Some(question);
            return Some(classification);
        }
        if self.mention.review.is_match(note) {
            return Some(Classification::new(Intent::OnDemandReview, TaskPriority::High));
        }
        if self.mention.improve.is_match(note) {
            return Some(Classification::new(Intent::Improve, TaskPriority::Normal));
        }

        let mut classification = Classification::new(Intent::HelpResponse, TaskPriority::Normal);
        classification.metadata.unrecognized_command = Some(self.mention.unrecognized_command(note));
        Some(classification)
    }
}

/// Any mention in an issue note → `issue_discussion`.
pub struct IssueNoteClassifier {
    mention: Mention,
}

impl IssueNoteClassifier {
    pub fn new(mention: Mention) -> Self {
        Self { mention }
    }
}

impl IntentClassifier for IssueNoteClassifier {
    fn name(&self) -> &'static str {
        "issue_note"
    }

    fn classify(&self, event: &WebhookEvent) -> Option<Classification> {
        match &event.kind {
            EventKind::NoteOnIssue { note, .. } if self.mention.is_mentioned(note) => Some(
                Classification::new(Intent::IssueDiscussion, TaskPriority::Normal),
            ),
            _ => None,
        }
    }
}

/// The develop label on an issue → `feature_dev`.
pub struct IssueLabelClassifier {
    label: String,
}

impl IssueLabelClassifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl IntentClassifier for IssueLabelClassifier {
    fn name(&self) -> &'static str {
        "issue_label"
    }

    fn classify(&self, event: &WebhookEvent) -> Option<Classification> {
        match &event.kind {
            EventKind::IssueLabelChanged { labels, .. } if labels.contains(&self.label) => {
                Some(Classification::new(Intent::FeatureDev, TaskPriority::Low))
            }
            _ => None,
        }
    }
}

/// Push to a branch → `incremental_review`.
pub struct PushClassifier;

impl IntentClassifier for PushClassifier {
    fn name(&self) -> &'static str {
        "push"
    }

    fn classify(&self, event: &WebhookEvent) -> Option<Classification> {
        match event.kind {
            EventKind::PushToBranch { .. } => Some(Classification::new(
                Intent::IncrementalReview,
                TaskPriority::Normal,
            )),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Parses, filters and classifies webhook events.
pub struct Router {
    bot_account_id: Option<ExternalUserId>,
    chain: Vec<Box<dyn IntentClassifier>>,
}

impl Router {
    /// A router with an explicit chain. Registration order is the tie-break:
    /// the first classifier to claim an event wins.
    pub fn new(bot_account_id: Option<ExternalUserId>, chain: Vec<Box<dyn IntentClassifier>>) -> Self {
        Self {
            bot_account_id,
            chain,
        }
    }

    /// The default chain: MR lifecycle, MR note, issue note, issue label, push.
    pub fn with_default_chain(config: &OrchestratorConfig) -> Result<Self, regex::Error> {
        let mention = Mention::new(&config.mention)?;
        Ok(Self::new(
            config.bot_account_id,
            vec![
                Box::new(MergeRequestLifecycleClassifier),
                Box::new(MergeRequestNoteClassifier::new(mention.clone())),
                Box::new(IssueNoteClassifier::new(mention)),
                Box::new(IssueLabelClassifier::new(config.develop_label.clone())),
                Box::new(PushClassifier),
            ],
        ))
    }

    /// Routes a normalised context. `None` means the event is ignored.
    pub fn route(&self, context: &EventContext) -> Option<RoutingResult> {
        let Some(event) = WebhookEvent::parse(context) else {
            debug!(event_type = %context.event_type, "Unsupported or incomplete webhook event");
            return None;
        };

        if self.is_bot_note(&event) {
            debug!(event_type = event.event_type(), "Ignoring note authored by the bot account");
            return None;
        }

        for classifier in &self.chain {
            if let Some(classification) = classifier.classify(&event) {
                debug!(
                    classifier = classifier.name(),
                    intent = %classification.intent,
                    priority = classification.priority.as_str(),
                    "Event classified"
                );
                return Some(
                    RoutingResult::new(classification.intent, classification.priority, event)
                        .with_metadata(classification.metadata),
                );
            }
        }

        debug!(event_type = event.event_type(), "No classifier claimed the event");
        None
    }

    // Only notes are filtered; bot-authored MRs still get reviewed.
    fn is_bot_note(&self, event: &WebhookEvent) -> bool {
        match self.bot_account_id {
            Some(bot) => event.is_note() && event.author_id() == Some(bot),
            None => false,
        }
    }
}
