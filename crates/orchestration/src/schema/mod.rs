//! Result schemas for executor payloads.
//!
//! Each schema-bearing task type has a typed result struct. Validation walks
//! the raw JSON and collects every violation with its dotted path; stripping
//! is a round trip through the typed struct, which drops unrecognised keys at
//! every level.

mod code_review;
mod feature_dev;
mod ui_adjustment;

pub use code_review::{
    CodeReviewResult, Finding, FindingsBySeverity, ReviewSummary, WalkthroughEntry,
};
pub use feature_dev::{FeatureDevResult, FileChange};
pub use ui_adjustment::UiAdjustmentResult;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::TaskType;

/// Number of violations quoted in a failure reason.
pub const REPORTED_VIOLATIONS: usize = 5;

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted path, e.g. `findings.0.title`.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A result payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Result payload is null")]
    NullPayload,

    #[error("Schema validation failed: {}", summarize(.0))]
    Invalid(Vec<Violation>),
}

impl SchemaError {
    /// All violations (empty for a null payload).
    pub fn violations(&self) -> &[Violation] {
        match self {
            SchemaError::NullPayload => &[],
            SchemaError::Invalid(violations) => violations,
        }
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .take(REPORTED_VIOLATIONS)
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The schema a task type's result must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSchema {
    CodeReview,
    FeatureDev,
    UiAdjustment,
}

impl ResultSchema {
    /// The schema for `task_type`, or `None` for free-form types.
    pub fn for_task_type(task_type: TaskType) -> Option<Self> {
        match task_type {
            TaskType::CodeReview | TaskType::SecurityAudit => Some(ResultSchema::CodeReview),
            TaskType::FeatureDev => Some(ResultSchema::FeatureDev),
            TaskType::UiAdjustment => Some(ResultSchema::UiAdjustment),
            TaskType::IssueDiscussion | TaskType::PrdCreation | TaskType::DeepAnalysis => None,
        }
    }

    /// Validates `payload` and returns it with unrecognised keys removed.
    pub fn validate_and_strip(self, payload: &Value) -> Result<Value, SchemaError> {
        if payload.is_null() {
            return Err(SchemaError::NullPayload);
        }

        let mut checker = Checker::default();
        match self {
            ResultSchema::CodeReview => code_review::check(&mut checker, payload),
            ResultSchema::FeatureDev => feature_dev::check(&mut checker, payload),
            ResultSchema::UiAdjustment => ui_adjustment::check(&mut checker, payload),
        }
        checker.finish()?;

        match self {
            ResultSchema::CodeReview => strip::<CodeReviewResult>(payload),
            ResultSchema::FeatureDev => strip::<FeatureDevResult>(payload),
            ResultSchema::UiAdjustment => strip::<UiAdjustmentResult>(payload),
        }
    }
}

fn strip<T: DeserializeOwned + Serialize>(payload: &Value) -> Result<Value, SchemaError> {
    let typed: T = serde_json::from_value(payload.clone()).map_err(|e| {
        SchemaError::Invalid(vec![Violation {
            path: "$".to_string(),
            message: e.to_string(),
        }])
    })?;
    serde_json::to_value(typed).map_err(|e| {
        SchemaError::Invalid(vec![Violation {
            path: "$".to_string(),
            message: e.to_string(),
        }])
    })
}

// ---------------------------------------------------------------------------
// Checker
// ---------------------------------------------------------------------------

/// Collects violations while walking a JSON document.
#[derive(Debug, Default)]
pub(crate) struct Checker {
    violations: Vec<Violation>,
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

impl Checker {
    fn fail(&mut self, path: String, message: impl Into<String>) {
        self.violations.push(Violation {
            path,
            message: message.into(),
        });
    }

    fn finish(self) -> Result<(), SchemaError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Invalid(self.violations))
        }
    }

    /// The document root must be an object.
    pub(crate) fn root<'a>(&mut self, value: &'a Value) -> Option<&'a Map<String, Value>> {
        let object = value.as_object();
        if object.is_none() {
            self.fail("$".to_string(), "must be an object");
        }
        object
    }

    fn required<'a>(
        &mut self,
        object: &'a Map<String, Value>,
        path: &str,
        key: &str,
    ) -> Option<&'a Value> {
        match object.get(key) {
            None | Some(Value::Null) => {
                self.fail(join(path, key), "is required");
                None
            }
            Some(value) => Some(value),
        }
    }

    pub(crate) fn object<'a>(
        &mut self,
        object: &'a Map<String, Value>,
        path: &str,
        key: &str,
    ) -> Option<&'a Map<String, Value>> {
        let value = self.required(object, path, key)?;
        let nested = value.as_object();
        if nested.is_none() {
            self.fail(join(path, key), "must be an object");
        }
        nested
    }

    pub(crate) fn string(
        &mut self,
        object: &Map<String, Value>,
        path: &str,
        key: &str,
        max_chars: Option<usize>,
    ) {
        let Some(value) = self.required(object, path, key) else {
            return;
        };
        match value.as_str() {
            None => self.fail(join(path, key), "must be a string"),
            Some(s) => {
                if let Some(max) = max_chars {
                    if s.chars().count() > max {
                        self.fail(join(path, key), format!("must not exceed {max} characters"));
                    }
                }
            }
        }
    }

    /// The key must be present; its value must be a string or null.
    pub(crate) fn nullable_string(&mut self, object: &Map<String, Value>, path: &str, key: &str) {
        match object.get(key) {
            None => self.fail(join(path, key), "must be present"),
            Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => self.fail(join(path, key), "must be a string or null"),
        }
    }

    pub(crate) fn one_of(
        &mut self,
        object: &Map<String, Value>,
        path: &str,
        key: &str,
        allowed: &[&str],
    ) {
        let Some(value) = self.required(object, path, key) else {
            return;
        };
        match value.as_str() {
            None => self.fail(join(path, key), "must be a string"),
            Some(s) if !allowed.contains(&s) => {
                self.fail(join(path, key), format!("must be one of: {}", allowed.join(", ")))
            }
            Some(_) => {}
        }
    }

    pub(crate) fn integer(&mut self, object: &Map<String, Value>, path: &str, key: &str, min: i64) {
        let Some(value) = self.required(object, path, key) else {
            return;
        };
        match value.as_i64() {
            None if value.as_u64().is_some() => {}
            None => self.fail(join(path, key), "must be an integer"),
            Some(n) if n < min => self.fail(join(path, key), format!("must be at least {min}")),
            Some(_) => {}
        }
    }

    pub(crate) fn boolean(&mut self, object: &Map<String, Value>, path: &str, key: &str) {
        let Some(value) = self.required(object, path, key) else {
            return;
        };
        if !value.is_boolean() {
            self.fail(join(path, key), "must be a boolean");
        }
    }

    /// The key must be present and hold an array; an empty one is fine.
    pub(crate) fn array<'a>(
        &mut self,
        object: &'a Map<String, Value>,
        path: &str,
        key: &str,
    ) -> Option<&'a Vec<Value>> {
        let Some(value) = object.get(key) else {
            self.fail(join(path, key), "must be present");
            return None;
        };
        let items = value.as_array();
        if items.is_none() {
            self.fail(join(path, key), "must be an array");
        }
        items
    }

    /// Each element of the array under `key` must be an object; `each` is
    /// called with the element and its path.
    pub(crate) fn objects<F>(&mut self, object: &Map<String, Value>, path: &str, key: &str, mut each: F)
    where
        F: FnMut(&mut Self, &Map<String, Value>, &str),
    {
        let Some(items) = self.array(object, path, key) else {
            return;
        };
        let base = join(path, key);
        for (index, item) in items.iter().enumerate() {
            let item_path = format!("{base}.{index}");
            match item.as_object() {
                Some(element) => each(self, element, &item_path),
                None => self.fail(item_path, "must be an object"),
            }
        }
    }

    pub(crate) fn strings(&mut self, object: &Map<String, Value>, path: &str, key: &str) {
        let Some(items) = self.array(object, path, key) else {
            return;
        };
        let base = join(path, key);
        for (index, item) in items.iter().enumerate() {
            if !item.is_string() {
                self.fail(format!("{base}.{index}"), "must be a string");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn null_payload_is_rejected_before_validation() {
        let error = ResultSchema::CodeReview
            .validate_and_strip(&Value::Null)
            .unwrap_err();
        assert_eq!(error.to_string(), "Result payload is null");
    }

    #[test]
    fn free_form_types_have_no_schema() {
        assert_eq!(ResultSchema::for_task_type(TaskType::IssueDiscussion), None);
        assert_eq!(ResultSchema::for_task_type(TaskType::PrdCreation), None);
        assert_eq!(
            ResultSchema::for_task_type(TaskType::SecurityAudit),
            Some(ResultSchema::CodeReview)
        );
    }

    #[test]
    fn failure_reason_quotes_at_most_five_violations() {
        let error = ResultSchema::FeatureDev
            .validate_and_strip(&json!({}))
            .unwrap_err();
        assert_eq!(error.violations().len(), 7);
        let text = error.to_string();
        assert!(text.starts_with("Schema validation failed: version: is required"));
        assert_eq!(text.matches("; ").count(), REPORTED_VIOLATIONS - 1);
    }

    #[test]
    fn non_object_root_is_rejected() {
        let error = ResultSchema::UiAdjustment
            .validate_and_strip(&json!([1, 2]))
            .unwrap_err();
        assert_eq!(error.to_string(), "Schema validation failed: $: must be an object");
    }
}
