//! Review strategy selection.
//!
//! A [`ReviewStrategy`] is derived per dispatch from the task type and, for
//! code reviews on a merge request, from the MR's changed file paths. It is
//! recorded into the task result and selects the skill set passed to the
//! runner.

use std::sync::LazyLock;

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::TaskType;

const FRONTEND_EXTENSIONS: &[&str] = &["vue", "tsx", "ts", "jsx", "js", "css", "scss", "sass", "less"];

const BACKEND_EXTENSIONS: &[&str] = &["php"];

const SECURITY_PATTERNS: &[&str] = &[
    r"\.env",
    r"auth",
    r"middleware",
    r"(?i)password",
    r"(?i)secret",
    r"(?i)token",
    r"config/auth\.php$",
    r"config/sanctum\.php$",
    r"config/cors\.php$",
    r"config/session\.php$",
    r"\.htaccess$",
    r"docker-compose.*\.yml$",
    r"Dockerfile",
];

const MIGRATION_DIR: &str = "database/migrations/";

static SECURITY_SET: LazyLock<Result<RegexSet, regex::Error>> = LazyLock::new(|| {
    RegexSet::new(SECURITY_PATTERNS).inspect_err(|error| {
        tracing::error!(%error, "security patterns do not compile; every path is treated as sensitive");
    })
});

/// Heuristic classification of a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewStrategy {
    BackendReview,
    FrontendReview,
    MixedReview,
    SecurityAudit,
}

impl ReviewStrategy {
    /// Returns the stable kebab-case name recorded in the task result.
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStrategy::BackendReview => "backend-review",
            ReviewStrategy::FrontendReview => "frontend-review",
            ReviewStrategy::MixedReview => "mixed-review",
            ReviewStrategy::SecurityAudit => "security-audit",
        }
    }

    /// Parses the name produced by [`ReviewStrategy::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "backend-review" => ReviewStrategy::BackendReview,
            "frontend-review" => ReviewStrategy::FrontendReview,
            "mixed-review" => ReviewStrategy::MixedReview,
            "security-audit" => ReviewStrategy::SecurityAudit,
            _ => return None,
        })
    }

    /// Skill identifiers the runner loads for this strategy.
    pub fn skills(self) -> &'static [&'static str] {
        match self {
            ReviewStrategy::BackendReview => &["backend-review"],
            ReviewStrategy::FrontendReview => &["frontend-review"],
            ReviewStrategy::MixedReview => &["frontend-review", "backend-review"],
            ReviewStrategy::SecurityAudit => &["security-audit"],
        }
    }
}

impl std::fmt::Display for ReviewStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the strategy for a task is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyPlan {
    /// The strategy is fixed by the task type.
    Fixed(ReviewStrategy),
    /// The strategy depends on the merge request's changed files.
    FromChangedFiles,
}

impl StrategyPlan {
    /// Chooses the plan for a task of `task_type`, given whether it references
    /// a merge request.
    pub fn for_task(task_type: TaskType, has_merge_request: bool) -> Self {
        match task_type {
            TaskType::SecurityAudit => StrategyPlan::Fixed(ReviewStrategy::SecurityAudit),
            TaskType::CodeReview if has_merge_request => StrategyPlan::FromChangedFiles,
            TaskType::UiAdjustment => StrategyPlan::Fixed(ReviewStrategy::FrontendReview),
            TaskType::CodeReview
            | TaskType::FeatureDev
            | TaskType::IssueDiscussion
            | TaskType::DeepAnalysis
            | TaskType::PrdCreation => StrategyPlan::Fixed(ReviewStrategy::BackendReview),
        }
    }
}

/// Classifies a set of changed file paths.
///
/// Security-sensitive paths override everything. Otherwise a change touching
/// both frontend and backend files is mixed, frontend-only is frontend, and
/// anything else (including an empty change) is backend.
pub fn resolve_from_paths<S: AsRef<str>>(paths: &[S]) -> ReviewStrategy {
    if paths.is_empty() {
        return ReviewStrategy::BackendReview;
    }

    if paths.iter().any(|p| is_security_sensitive(p.as_ref())) {
        return ReviewStrategy::SecurityAudit;
    }

    let mut frontend = false;
    let mut backend = false;
    for path in paths {
        let path = path.as_ref();
        let extension = extension_of(path);
        frontend |= FRONTEND_EXTENSIONS.contains(&extension.as_str());
        backend |= BACKEND_EXTENSIONS.contains(&extension.as_str()) || is_migration(path);
        if frontend && backend {
            return ReviewStrategy::MixedReview;
        }
    }

    if frontend {
        ReviewStrategy::FrontendReview
    } else {
        ReviewStrategy::BackendReview
    }
}

/// Returns `true` if the path matches any security-sensitive pattern.
///
/// Fails closed: if the pattern set cannot be built, every path is sensitive.
pub fn is_security_sensitive(path: &str) -> bool {
    match SECURITY_SET.as_ref() {
        Ok(set) => set.is_match(path),
        Err(_) => true,
    }
}

fn is_migration(path: &str) -> bool {
    path.contains(MIGRATION_DIR)
}

// Lowercased extension of the final path component, or "" if none.
fn extension_of(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}
