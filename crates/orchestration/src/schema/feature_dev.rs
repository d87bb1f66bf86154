use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Checker;

const FILE_ACTIONS: &[&str] = &["created", "modified"];

/// Output of a feature development run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDevResult {
    pub version: String,
    pub branch: String,
    pub mr_title: String,
    pub mr_description: String,
    pub files_changed: Vec<FileChange>,
    pub tests_added: bool,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub action: String,
    pub summary: String,
}

pub(super) fn check(c: &mut Checker, payload: &Value) {
    if let Some(root) = c.root(payload) {
        check_fields(c, root);
    }
}

/// Checks the feature-dev fields of an already-verified root object.
pub(super) fn check_fields(c: &mut Checker, root: &Map<String, Value>) {
    c.string(root, "", "version", None);
    c.string(root, "", "branch", Some(255));
    c.string(root, "", "mr_title", Some(500));
    c.string(root, "", "mr_description", None);
    c.objects(root, "", "files_changed", |c, change, path| {
        c.string(change, path, "path", None);
        c.one_of(change, path, "action", FILE_ACTIONS);
        c.string(change, path, "summary", None);
    });
    c.boolean(root, "", "tests_added");
    c.string(root, "", "notes", None);
}
