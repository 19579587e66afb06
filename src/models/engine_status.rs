use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RecordTimestamps;

/// Process-wide engine milestones for one run.
///
/// Created when the run starts and mutated only through
/// [`EngineStatusTracker`](crate::orchestration::EngineStatusTracker), which
/// enforces that the fatal flag never resets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EngineStatus {
    pub templates_loaded: bool,
    pub main_outputs_loaded: bool,
    pub is_fatal_state: bool,
    pub first_start: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub record: RecordTimestamps,
}
