use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{feature_dev, Checker, FeatureDevResult};

/// Output of a UI adjustment run: a feature-dev result plus screenshots.
///
/// Screenshots are base64 images; `null` means the capture failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiAdjustmentResult {
    #[serde(flatten)]
    pub feature: FeatureDevResult,
    pub screenshot: Option<String>,
    pub screenshot_mobile: Option<String>,
}

pub(super) fn check(c: &mut Checker, payload: &Value) {
    let Some(root) = c.root(payload) else {
        return;
    };
    feature_dev::check_fields(c, root);
    c.nullable_string(root, "", "screenshot");
    c.nullable_string(root, "", "screenshot_mobile");
}
