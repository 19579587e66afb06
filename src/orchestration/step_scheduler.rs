//! # Step Scheduler
//!
//! Owns the run's steps and their attempt histories and decides which step may
//! open its next attempt.
//!
//! ## Ordering
//!
//! Steps are dispatched by priority value, lowest first under
//! [`PriorityOrder::Ascending`] (the default) and highest first under
//! [`PriorityOrder::Descending`]. Equal priorities fall back to registration
//! order, which is also step id order, so selection over an unchanged step set
//! is deterministic.
//!
//! ## Eligibility
//!
//! A step is eligible when all of the following hold:
//!
//! - the engine has loaded templates and main outputs and is not fatal
//! - the step has no `Succeeded` execution
//! - the step has no `Pending` or `Running` execution
//! - it has never run, or its latest attempt is `Retrying`, the retry budget
//!   still allows another attempt and the auto-retry delay has passed since that
//!   attempt closed

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::{EnginePolicy, PriorityOrder};
use crate::constants::MAIN_MARKER;
use crate::error::{EngineError, Result};
use crate::models::{EngineStatus, Execution, NewStep, RecordTimestamps, Step};
use crate::state_machine::guards::{
    EngineDispatchGuard, ExecutionOwnershipGuard, StepNotCompleteGuard, StepNotInFlightGuard,
};
use crate::state_machine::{ExecutionStatus, StateGuard, StateMachineError};

#[derive(Debug, Clone)]
pub struct StepScheduler {
    steps: Vec<Step>,
    priority_order: PriorityOrder,
    next_step_id: u64,
    next_execution_id: u64,
}

impl StepScheduler {
    pub fn new(priority_order: PriorityOrder) -> Self {
        Self {
            steps: Vec::new(),
            priority_order,
            next_step_id: 1,
            next_execution_id: 1,
        }
    }

    pub fn priority_order(&self) -> PriorityOrder {
        self.priority_order
    }

    /// Register steps. The whole batch is rejected if any name is empty,
    /// reserved or already taken.
    pub fn register_steps(&mut self, new_steps: Vec<NewStep>, now: DateTime<Utc>) -> Result<()> {
        let mut names: HashSet<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();
        for new_step in &new_steps {
            let name = new_step.name.as_str();
            if name.trim().is_empty() {
                return Err(EngineError::Validation(
                    "step name must not be empty".to_string(),
                ));
            }
            if name == MAIN_MARKER {
                return Err(EngineError::ReservedStepName(name.to_string()));
            }
            if !names.insert(name) {
                return Err(EngineError::DuplicateStep(name.to_string()));
            }
        }

        for new_step in new_steps {
            let id = self.next_step_id;
            self.next_step_id += 1;
            debug!(step_id = id, step_name = %new_step.name, priority = new_step.priority, "Registered step");
            self.steps.push(Step {
                id,
                name: new_step.name,
                template: new_step.template,
                parameters: new_step.parameters,
                priority: new_step.priority,
                executions: Vec::new(),
                record: RecordTimestamps::new(now),
            });
        }

        info!(step_count = self.steps.len(), "Steps registered");
        Ok(())
    }

    /// All steps in registration order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, step_id: u64) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_mut(&mut self, step_id: u64) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    pub fn step_by_name(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Highest-priority step that may open a new attempt now
    pub fn next_eligible_step(
        &self,
        status: &EngineStatus,
        policy: &EnginePolicy,
        now: DateTime<Utc>,
    ) -> Option<&Step> {
        if !status.templates_loaded || !status.main_outputs_loaded {
            return None;
        }
        EngineDispatchGuard.check(status).ok()?;

        let candidates = self
            .steps
            .iter()
            .filter(|step| Self::is_eligible(step, policy, now));

        match self.priority_order {
            PriorityOrder::Ascending => candidates.min_by_key(|s| (s.priority, s.id)),
            PriorityOrder::Descending => candidates.min_by_key(|s| (Reverse(s.priority), s.id)),
        }
    }

    fn is_eligible(step: &Step, policy: &EnginePolicy, now: DateTime<Utc>) -> bool {
        if StepNotCompleteGuard.check(step).is_err() || StepNotInFlightGuard.check(step).is_err() {
            return false;
        }
        match step.latest_execution() {
            None => true,
            Some(latest) if latest.status == ExecutionStatus::Retrying => {
                step.attempts() < policy.max_attempts() as usize
                    && Self::retry_ready_at(latest, policy).is_some_and(|ready| ready <= now)
            }
            Some(_) => false,
        }
    }

    /// When a closed attempt's retry becomes due. `None` when the delay lies
    /// beyond the representable calendar, so the retry never becomes due.
    fn retry_ready_at(closed: &Execution, policy: &EnginePolicy) -> Option<DateTime<Utc>> {
        let delay = chrono::Duration::from_std(policy.auto_retry_delay()).ok()?;
        closed.record.updated_at.checked_add_signed(delay)
    }

    /// Earliest moment a step currently awaiting retry becomes eligible
    pub fn next_retry_at(&self, policy: &EnginePolicy) -> Option<DateTime<Utc>> {
        self.steps
            .iter()
            .filter(|step| !step.is_complete() && !step.has_in_flight_execution())
            .filter(|step| step.attempts() < policy.max_attempts() as usize)
            .filter_map(|step| step.latest_execution())
            .filter(|latest| latest.status == ExecutionStatus::Retrying)
            .filter_map(|latest| Self::retry_ready_at(latest, policy))
            .min()
    }

    /// Open a fresh `Pending` attempt for a step
    pub fn open_attempt(&mut self, step_id: u64, now: DateTime<Utc>) -> Result<&mut Execution> {
        let execution = Execution::scaffold(self.next_execution_id, step_id, now);
        self.record_attempt(step_id, execution)
    }

    /// Append an execution to a step's history.
    ///
    /// Refuses a completed step, a step that already has an in-flight attempt
    /// and an execution opened for a different step.
    pub fn record_attempt(&mut self, step_id: u64, execution: Execution) -> Result<&mut Execution> {
        let step = self
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| EngineError::UnknownStep(step_id.to_string()))?;

        StepNotCompleteGuard
            .check(step)
            .map_err(StateMachineError::from)?;
        StepNotInFlightGuard
            .check(step)
            .map_err(StateMachineError::from)?;
        ExecutionOwnershipGuard { step_id }
            .check(&execution)
            .map_err(StateMachineError::from)?;

        self.next_execution_id = self.next_execution_id.max(execution.id.saturating_add(1));
        step.record.touch(execution.record.updated_at);
        step.executions.push(execution);

        step.executions
            .last_mut()
            .ok_or_else(|| EngineError::StateMachine("attempt was not recorded".to_string()))
    }

    /// Whether no step will ever open another attempt
    pub fn all_terminal(&self) -> bool {
        self.steps.iter().all(Step::is_terminal)
    }

    /// Steps holding a `Pending` or `Running` execution
    pub fn in_flight_steps(&self) -> Vec<u64> {
        self.steps
            .iter()
            .filter(|s| s.has_in_flight_execution())
            .map(|s| s.id)
            .collect()
    }
}
