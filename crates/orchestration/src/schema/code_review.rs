use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Checker;

const SEVERITIES: &[&str] = &["critical", "major", "minor"];
const CATEGORIES: &[&str] = &["security", "bug", "performance", "style", "convention", "prompt-injection"];
const RISK_LEVELS: &[&str] = &["high", "medium", "low"];
const COMMIT_STATUSES: &[&str] = &["success", "failed"];

/// Output of a code review or security audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeReviewResult {
    pub version: String,
    pub summary: ReviewSummary,
    pub findings: Vec<Finding>,
    pub labels: Vec<String>,
    pub commit_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub risk_level: String,
    pub total_findings: u64,
    pub findings_by_severity: FindingsBySeverity,
    pub walkthrough: Vec<WalkthroughEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingsBySeverity {
    pub critical: u64,
    pub major: u64,
    pub minor: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkthroughEntry {
    pub file: String,
    pub change_summary: String,
}

/// One review finding, anchored to a line range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: u64,
    pub severity: String,
    pub category: String,
    pub file: String,
    pub line: u64,
    pub end_line: u64,
    pub title: String,
    pub description: String,
    pub suggestion: String,
    pub labels: Vec<String>,
}

pub(super) fn check(c: &mut Checker, payload: &Value) {
    let Some(root) = c.root(payload) else {
        return;
    };

    c.string(root, "", "version", None);

    if let Some(summary) = c.object(root, "", "summary") {
        let path = "summary";
        c.one_of(summary, path, "risk_level", RISK_LEVELS);
        c.integer(summary, path, "total_findings", 0);
        if let Some(by_severity) = c.object(summary, path, "findings_by_severity") {
            let path = "summary.findings_by_severity";
            for key in SEVERITIES {
                c.integer(by_severity, path, key, 0);
            }
        }
        c.objects(summary, path, "walkthrough", |c, entry, path| {
            c.string(entry, path, "file", None);
            c.string(entry, path, "change_summary", None);
        });
    }

    c.objects(root, "", "findings", |c, finding, path| {
        c.integer(finding, path, "id", 1);
        c.one_of(finding, path, "severity", SEVERITIES);
        c.one_of(finding, path, "category", CATEGORIES);
        c.string(finding, path, "file", None);
        c.integer(finding, path, "line", 1);
        c.integer(finding, path, "end_line", 1);
        c.string(finding, path, "title", Some(500));
        c.string(finding, path, "description", None);
        c.string(finding, path, "suggestion", None);
        c.strings(finding, path, "labels");
    });

    c.strings(root, "", "labels");
    c.one_of(root, "", "commit_status", COMMIT_STATUSES);
}
