//! # Execution Model
//!
//! One attempt record of running a [`Step`](super::Step) against the
//! provisioning backend.
//!
//! An execution starts as a scaffold (`Pending`, every detail field empty) and
//! is filled in exactly once by reconciliation. Reconciliation overwrites
//! fields rather than merging, so a retry always opens a fresh scaffold instead
//! of reusing the previous attempt's record.
//!
//! The resume token is the only state that may be set on a `Running` execution
//! before reconciliation: it lets an interrupted in-flight poll be picked up
//! again. It is cleared on every transition out of `Running`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RecordTimestamps;
use crate::state_machine::ExecutionStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    #[serde(rename = "ID")]
    pub id: u64,
    pub status: ExecutionStatus,
    pub step_id: u64,
    /// External deployment instance identifier; empty until assigned
    #[serde(skip)]
    pub deployment_id: String,
    pub error: String,
    pub error_details: String,
    pub code: String,
    pub provisioning_state: String,
    pub details: String,
    /// Last observed state timestamp
    pub timestamp: DateTime<Utc>,
    /// Normalized display duration; empty when unknown
    pub duration: String,
    pub correlation_id: String,
    #[serde(skip)]
    pub resume_token: String,
    /// Wall-clock moment the attempt entered `Running`
    #[serde(skip)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub record: RecordTimestamps,
}

impl Execution {
    /// Create a pristine scaffold for a new attempt of `step_id`
    pub fn scaffold(id: u64, step_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: ExecutionStatus::Pending,
            step_id,
            deployment_id: String::new(),
            error: String::new(),
            error_details: String::new(),
            code: String::new(),
            provisioning_state: String::new(),
            details: String::new(),
            timestamp: now,
            duration: String::new(),
            correlation_id: String::new(),
            resume_token: String::new(),
            started_at: None,
            record: RecordTimestamps::new(now),
        }
    }

    /// Reset every reconciled field, keeping identity and start time.
    ///
    /// Used before re-reconciling a resumed execution so the result does not
    /// accumulate fields from an earlier observation.
    pub fn reset_for_reconciliation(&mut self) {
        self.deployment_id.clear();
        self.error.clear();
        self.error_details.clear();
        self.code.clear();
        self.provisioning_state.clear();
        self.details.clear();
        self.duration.clear();
        self.correlation_id.clear();
    }

    pub fn has_resume_token(&self) -> bool {
        !self.resume_token.is_empty()
    }

    /// Time spent in `Running` as of `now`
    pub fn running_for(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.started_at
            .and_then(|started| (now - started).to_std().ok())
    }
}
