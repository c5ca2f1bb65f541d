//! Display option produced from a raw item.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of a picker list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListerOption {
    pub label: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl ListerOption {
    pub fn new(label: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            description: None,
            icon: None,
            group: None,
        }
    }
}
