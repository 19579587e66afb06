use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeploymentResult, JsonMap, RecordTimestamps};

/// Output values of a successfully completed module.
///
/// Outputs are run-global artifacts referenced by module name rather than
/// owned by a step. They are created once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "moduleName")]
    pub module_name: String,
    #[serde(rename = "Values")]
    pub values: JsonMap,
    #[serde(skip)]
    pub record: RecordTimestamps,
}

impl Output {
    pub fn new(module_name: impl Into<String>, values: JsonMap, now: DateTime<Utc>) -> Self {
        Self {
            module_name: module_name.into(),
            values,
            record: RecordTimestamps::new(now),
        }
    }

    /// Capture the outputs published by a successful deployment
    pub fn from_result(module_name: impl Into<String>, result: &DeploymentResult) -> Self {
        Self::new(module_name, result.outputs.clone(), result.timestamp)
    }
}
