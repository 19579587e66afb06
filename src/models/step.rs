//! # Step Model
//!
//! A named, prioritized unit of deployment work and its attempt history.
//!
//! Steps exclusively own their executions: the history is append-only and
//! ordered by attempt. A step is complete once it holds a `Succeeded`
//! execution, after which no further attempts are ever opened for it.

use serde::{Deserialize, Serialize};

use super::{Execution, JsonMap, RecordTimestamps};
use crate::state_machine::ExecutionStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "ID")]
    pub id: u64,
    /// Unique across all steps of a run
    pub name: String,
    #[serde(skip)]
    pub template: JsonMap,
    #[serde(skip)]
    pub parameters: JsonMap,
    #[serde(rename = "order")]
    pub priority: u32,
    pub executions: Vec<Execution>,
    #[serde(skip)]
    pub record: RecordTimestamps,
}

/// New Step for registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewStep {
    pub name: String,
    #[serde(default)]
    pub template: JsonMap,
    #[serde(default)]
    pub parameters: JsonMap,
    #[serde(default, alias = "order")]
    pub priority: u32,
}

impl NewStep {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            ..Default::default()
        }
    }

    pub fn with_template(mut self, template: JsonMap) -> Self {
        self.template = template;
        self
    }

    pub fn with_parameters(mut self, parameters: JsonMap) -> Self {
        self.parameters = parameters;
        self
    }
}

impl Step {
    /// Most recent attempt, if any
    pub fn latest_execution(&self) -> Option<&Execution> {
        self.executions.last()
    }

    pub fn latest_execution_mut(&mut self) -> Option<&mut Execution> {
        self.executions.last_mut()
    }

    /// The attempt currently holding the step's in-flight slot
    pub fn in_flight_execution(&self) -> Option<&Execution> {
        self.executions.iter().find(|e| e.status.is_in_flight())
    }

    pub fn has_in_flight_execution(&self) -> bool {
        self.in_flight_execution().is_some()
    }

    /// Whether the step holds a `Succeeded` execution
    pub fn is_complete(&self) -> bool {
        self.executions
            .iter()
            .any(|e| e.status == ExecutionStatus::Succeeded)
    }

    /// Whether no further attempt will ever be opened for this step
    pub fn is_terminal(&self) -> bool {
        self.is_complete()
            || self
                .latest_execution()
                .is_some_and(|e| e.status.is_terminal())
    }

    /// Number of attempts recorded so far
    pub fn attempts(&self) -> usize {
        self.executions.len()
    }

    /// Retries consumed so far: every attempt beyond the first
    pub fn retry_count(&self) -> u32 {
        u32::try_from(self.executions.len().saturating_sub(1)).unwrap_or(u32::MAX)
    }

    /// Final status of the step if terminal, otherwise the latest attempt's status
    pub fn current_status(&self) -> Option<ExecutionStatus> {
        if self.is_complete() {
            return Some(ExecutionStatus::Succeeded);
        }
        self.latest_execution().map(|e| e.status)
    }
}
