use chrono::{DateTime, Utc};

use super::errors::{ActionError, ActionResult};
use super::states::ExecutionStatus;
use crate::models::Execution;

/// Trait for side effects applied after a successful transition
pub trait StateAction {
    fn execute(
        &self,
        execution: &mut Execution,
        from: ExecutionStatus,
        to: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> ActionResult<()>;

    fn description(&self) -> &'static str;
}

/// Clears the resume token on every transition out of `Running`, retries included
pub struct ClearResumeTokenAction;

impl StateAction for ClearResumeTokenAction {
    fn execute(
        &self,
        execution: &mut Execution,
        _from: ExecutionStatus,
        to: ExecutionStatus,
        _now: DateTime<Utc>,
    ) -> ActionResult<()> {
        if to != ExecutionStatus::Running {
            execution.resume_token.clear();
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Clear resume token"
    }
}

/// Records the moment an attempt enters `Running`; timeouts are measured from it
pub struct RecordStartAction;

impl StateAction for RecordStartAction {
    fn execute(
        &self,
        execution: &mut Execution,
        from: ExecutionStatus,
        to: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> ActionResult<()> {
        if to == ExecutionStatus::Running {
            if from != ExecutionStatus::Pending {
                return Err(ActionError::InvalidState {
                    state: from.to_string(),
                });
            }
            execution.started_at = Some(now);
            execution.timestamp = now;
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Record attempt start"
    }
}

/// Stamps the record's update time
pub struct TouchRecordAction;

impl StateAction for TouchRecordAction {
    fn execute(
        &self,
        execution: &mut Execution,
        _from: ExecutionStatus,
        _to: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> ActionResult<()> {
        execution.record.touch(now);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Touch record timestamps"
    }
}
