use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{
    actions::{ClearResumeTokenAction, RecordStartAction, StateAction, TouchRecordAction},
    errors::{StateMachineError, StateMachineResult},
    events::ExecutionEvent,
    states::ExecutionStatus,
};
use crate::config::EnginePolicy;
use crate::error::EngineError;
use crate::models::{format_elapsed, Execution, Output};
use crate::orchestration::result_reconciler::{Reconciliation, ResultReconciler};
use crate::orchestration::types::DeploymentOutcome;

/// Facts about the attempt being evaluated that are owned by other components
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext<'a> {
    /// Name of the step, used as the output module name on success
    pub step_name: &'a str,
    /// Retries already consumed by the step before this attempt
    pub retry_count: u32,
    /// Whether the engine has entered fatal state
    pub engine_fatal: bool,
    pub now: DateTime<Utc>,
}

/// A completed state change
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
    pub event: &'static str,
}

impl Transition {
    /// Whether the step should be handed back to the scheduler for another attempt
    pub fn schedules_retry(&self) -> bool {
        self.to == ExecutionStatus::Retrying
    }
}

/// Outcome of reconciling an external result into a running execution
#[derive(Debug)]
pub struct ReconciledTransition {
    pub transition: Transition,
    /// Field-level report from the reconciler
    pub reconciliation: Reconciliation,
    /// Created only when the attempt succeeded
    pub output: Option<Output>,
    /// Why the attempt failed; `None` when it succeeded
    pub error: Option<EngineError>,
}

/// Status lifecycle of individual execution attempts.
///
/// The machine itself is stateless apart from the shared, read-only policy, so
/// one instance can evaluate executions of different steps concurrently.
/// Exclusivity on a single execution is the caller's responsibility (the
/// scheduler holds at most one in-flight execution per step).
#[derive(Debug, Clone, Copy)]
pub struct ExecutionStateMachine {
    policy: EnginePolicy,
}

impl ExecutionStateMachine {
    pub fn new(policy: EnginePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        &self,
        current_state: ExecutionStatus,
        event: &ExecutionEvent,
        context: &AttemptContext<'_>,
    ) -> StateMachineResult<ExecutionStatus> {
        let target = match (current_state, event) {
            (ExecutionStatus::Pending, ExecutionEvent::Start) => ExecutionStatus::Running,

            (ExecutionStatus::Running, ExecutionEvent::Complete) => ExecutionStatus::Succeeded,

            (ExecutionStatus::Running, event) if event.is_recoverable_failure() => {
                let exhausted = match event {
                    ExecutionEvent::TimeOut => ExecutionStatus::TimedOut,
                    _ => ExecutionStatus::Failed,
                };
                self.failure_target(context, exhausted)
            }

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Retry-versus-terminal rule shared by failures and timeouts
    fn failure_target(
        &self,
        context: &AttemptContext<'_>,
        exhausted: ExecutionStatus,
    ) -> ExecutionStatus {
        if context.engine_fatal {
            ExecutionStatus::FatallyFailed
        } else if context.retry_count < self.policy.step_max_retries() {
            ExecutionStatus::Retrying
        } else {
            exhausted
        }
    }

    /// Apply an event to an execution and run post-transition actions
    pub fn transition(
        &self,
        execution: &mut Execution,
        event: &ExecutionEvent,
        context: &AttemptContext<'_>,
    ) -> StateMachineResult<Transition> {
        let from = execution.status;
        let to = self.determine_target_state(from, event, context)?;
        self.apply(execution, from, to, event, context.now)
    }

    fn apply(
        &self,
        execution: &mut Execution,
        from: ExecutionStatus,
        to: ExecutionStatus,
        event: &ExecutionEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Transition> {
        execution.status = to;

        let actions: [&dyn StateAction; 3] =
            [&RecordStartAction, &ClearResumeTokenAction, &TouchRecordAction];
        for action in actions {
            action.execute(execution, from, to, now)?;
        }

        debug!(
            execution_id = execution.id,
            step_id = execution.step_id,
            from = %from,
            to = %to,
            event = event.event_type(),
            "Execution transitioned"
        );

        Ok(Transition {
            from,
            to,
            event: event.event_type(),
        })
    }

    /// Move a fresh scaffold into `Running`
    pub fn start(
        &self,
        execution: &mut Execution,
        context: &AttemptContext<'_>,
    ) -> StateMachineResult<Transition> {
        self.transition(execution, &ExecutionEvent::Start, context)
    }

    /// Reconcile an external outcome into a running execution and advance it.
    ///
    /// The reconciler writes the reported fields; the state machine then
    /// replaces the reported status with the lifecycle status. A payload that
    /// failed to decode never blocks the transition.
    pub fn reconcile(
        &self,
        execution: &mut Execution,
        outcome: &DeploymentOutcome,
        context: &AttemptContext<'_>,
    ) -> StateMachineResult<ReconciledTransition> {
        let from = execution.status;
        if from != ExecutionStatus::Running {
            return Err(StateMachineError::InvalidTransition {
                from: from.to_string(),
                event: "reconcile".to_string(),
            });
        }

        let reconciliation = ResultReconciler::reconcile(execution, outcome);

        let event = match reconciliation.status {
            ExecutionStatus::Succeeded => ExecutionEvent::Complete,
            ExecutionStatus::TimedOut => ExecutionEvent::TimeOut,
            reported => {
                if !reported.is_failure() {
                    warn!(
                        step = context.step_name,
                        reported = %reported,
                        "Deployment returned a non-final status; treating as failure"
                    );
                }
                ExecutionEvent::fail_with_error(failure_message(execution, reported))
            }
        };

        if reconciliation.status == ExecutionStatus::Succeeded && !execution.error.is_empty() {
            warn!(
                step = context.step_name,
                code = %execution.code,
                "Succeeded deployment carried an error payload; error fields retained"
            );
        }

        let to = self.determine_target_state(from, &event, context)?;
        let error = (to != ExecutionStatus::Succeeded)
            .then(|| classify_failure(execution, &event, &reconciliation, context));
        let transition = self.apply(execution, from, to, &event, context.now)?;

        let output = match (to, outcome.result()) {
            (ExecutionStatus::Succeeded, Some(result)) => {
                Some(Output::from_result(context.step_name, result))
            }
            _ => None,
        };

        Ok(ReconciledTransition {
            transition,
            reconciliation,
            output,
            error,
        })
    }

    /// Classify a deadline miss on a running execution
    pub fn timeout_error(&self, execution: &Execution, context: &AttemptContext<'_>) -> EngineError {
        EngineError::Timeout {
            step: context.step_name.to_string(),
            after: execution.running_for(context.now).unwrap_or_default(),
        }
    }

    /// Time out a running execution that produced no result within budget
    pub fn time_out(
        &self,
        execution: &mut Execution,
        context: &AttemptContext<'_>,
    ) -> StateMachineResult<Transition> {
        if let Some(elapsed) = execution.running_for(context.now) {
            execution.duration = format_elapsed(elapsed);
            execution.error = format!(
                "No deployment result within {}",
                format_elapsed(self.policy.step_deployment_timeout().unwrap_or(elapsed))
            );
        }
        execution.timestamp = context.now;
        self.transition(execution, &ExecutionEvent::TimeOut, context)
    }

    /// Whether a running execution has exceeded the deployment timeout
    pub fn deadline_elapsed(&self, execution: &Execution, now: DateTime<Utc>) -> bool {
        match (
            execution.status,
            self.policy.step_deployment_timeout(),
            execution.running_for(now),
        ) {
            (ExecutionStatus::Running, Some(limit), Some(elapsed)) => elapsed >= limit,
            _ => false,
        }
    }
}

/// An undecodable payload wins over the status it was reported with
fn classify_failure(
    execution: &Execution,
    event: &ExecutionEvent,
    reconciliation: &Reconciliation,
    context: &AttemptContext<'_>,
) -> EngineError {
    if let Some(reason) = &reconciliation.decode_error {
        return EngineError::ErrorPayloadDecode(reason.clone());
    }
    match event.error_message() {
        Some(message) => EngineError::Executor(message.to_string()),
        None => EngineError::Timeout {
            step: context.step_name.to_string(),
            after: execution.running_for(context.now).unwrap_or_default(),
        },
    }
}

fn failure_message(execution: &Execution, reported: ExecutionStatus) -> String {
    if execution.error.is_empty() {
        format!("Deployment finished with status {reported}")
    } else {
        execution.error.clone()
    }
}
