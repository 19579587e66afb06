//! # Deployment Engine
//!
//! The control loop tying scheduler, state machine, reconciler, status tracker
//! and telemetry together for one run.
//!
//! ## Loop
//!
//! 1. Check the overall timeout. Once exceeded the engine is fatal: nothing new
//!    is dispatched, in-flight calls still reconcile.
//! 2. While concurrency permits are available, restart executions interrupted
//!    by a previous process, then dispatch eligible steps.
//! 3. Wait for the next attempt report, the next retry becoming due, or the
//!    overall deadline, whichever comes first.
//! 4. Reconcile the report through the state machine and record telemetry.
//!
//! The loop ends when every step is terminal, or when the engine is fatal and
//! nothing is in flight.
//!
//! ## Timing
//!
//! Wall-clock timestamps come from an [`EngineClock`] anchored to tokio's
//! monotonic clock, so tests running on paused time observe consistent
//! timestamps, retry delays and timeouts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use super::engine_status::EngineStatusTracker;
use super::executor::{DeploymentExecutor, DeploymentRequest, ExecutorError};
use super::step_scheduler::StepScheduler;
use super::types::{DeploymentOutcome, ErrorPayload};
use crate::config::{EngineConfig, EnginePolicy, EngineSettings};
use crate::constants::{events, MAIN_MARKER};
use crate::error::{EngineError, Result};
use crate::events::EventPublisher;
use crate::logging::{
    log_engine_operation, log_error, log_execution_operation, log_step_operation,
};
use crate::models::{
    format_elapsed, DeploymentResult, EngineStatus, Execution, JsonMap, NewStep, Output, Step,
};
use crate::state_machine::{AttemptContext, ExecutionStateMachine, ExecutionStatus, Transition};
use crate::telemetry::{DeploymentMetric, TelemetryLedger, TelemetryScope};

/// Wall clock derived from tokio's monotonic clock
#[derive(Debug, Clone, Copy)]
pub struct EngineClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
}

impl EngineClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Utc::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + elapsed
    }

    /// Time left until `target`, zero if already passed
    pub fn until(&self, target: DateTime<Utc>) -> Duration {
        (target - self.now()).to_std().unwrap_or(Duration::ZERO)
    }
}

impl Default for EngineClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Final state of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub name: String,
    pub status: Option<ExecutionStatus>,
    pub attempts: usize,
    pub error: String,
    pub code: String,
}

/// Result of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub steps: Vec<StepSummary>,
    /// Outputs by module name, main outputs included
    pub outputs: BTreeMap<String, Output>,
    pub elapsed: Duration,
    pub fatal: bool,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        !self.fatal
            && self
                .steps
                .iter()
                .all(|s| s.status == Some(ExecutionStatus::Succeeded))
    }

    pub fn step(&self, name: &str) -> Option<&StepSummary> {
        self.steps.iter().find(|s| s.name == name)
    }
}

enum CallOutcome {
    Returned(std::result::Result<DeploymentResult, ExecutorError>),
    TimedOut,
    Panicked(String),
}

struct AttemptReport {
    step_id: u64,
    execution_id: u64,
    outcome: CallOutcome,
}

/// What to do with an execution left in flight by a previous process
enum Interrupted {
    /// Never issued: start it like a fresh attempt
    Start,
    /// Continue polling with the resume token, within the remaining budget
    Resume {
        token: String,
        remaining: Option<Duration>,
    },
    /// Too old or not resumable: time it out
    Expire(&'static str),
}

/// Drives one deployment run
pub struct DeploymentEngine<E: DeploymentExecutor> {
    executor: Arc<E>,
    policy: EnginePolicy,
    settings: EngineSettings,
    state_machine: ExecutionStateMachine,
    scheduler: StepScheduler,
    status: EngineStatusTracker,
    telemetry: TelemetryLedger,
    publisher: EventPublisher,
    outputs: BTreeMap<String, Output>,
    permits: Arc<Semaphore>,
    in_flight: HashMap<u64, u64>,
    /// Steps whose interrupted execution still waits for a permit
    interrupted: VecDeque<u64>,
    clock: EngineClock,
}

impl<E: DeploymentExecutor> DeploymentEngine<E> {
    /// Validate configuration and build an engine
    pub fn new(executor: E, config: &EngineConfig) -> Result<Self> {
        let policy = config.validate()?;
        Self::with_policy(executor, policy, config.engine)
    }

    pub fn with_policy(executor: E, policy: EnginePolicy, settings: EngineSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            executor: Arc::new(executor),
            policy,
            settings,
            state_machine: ExecutionStateMachine::new(policy),
            scheduler: StepScheduler::new(settings.priority_order),
            status: EngineStatusTracker::new(),
            telemetry: TelemetryLedger::new(),
            publisher: EventPublisher::default(),
            outputs: BTreeMap::new(),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_steps)),
            in_flight: HashMap::new(),
            interrupted: VecDeque::new(),
            clock: EngineClock::new(),
        })
    }

    pub fn with_event_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub fn status(&self) -> &EngineStatus {
        self.status.status()
    }

    pub fn steps(&self) -> &[Step] {
        self.scheduler.steps()
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.scheduler.step_by_name(name)
    }

    pub fn outputs(&self) -> &BTreeMap<String, Output> {
        &self.outputs
    }

    pub fn telemetry(&self) -> &TelemetryLedger {
        &self.telemetry
    }

    pub fn events(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Register the run's steps and mark templates loaded
    pub fn load_templates(&mut self, steps: Vec<NewStep>) -> Result<()> {
        let now = self.clock.now();
        self.status.start(now);
        self.scheduler.register_steps(steps, now)?;
        for step in self.scheduler.steps() {
            log_step_operation(
                "register",
                Some(step.id),
                Some(&step.name),
                "registered",
                Some(&format!("priority {}", step.priority)),
            );
        }
        self.status.mark_templates_loaded(now);
        self.telemetry.set(
            DeploymentMetric::StepsTotal,
            &TelemetryScope::Run,
            self.scheduler.steps().len().to_string(),
        );
        log_engine_operation("load_templates", "loaded", None);
        Ok(())
    }

    /// Record the top-level outputs and mark them loaded
    pub fn load_main_outputs(&mut self, values: JsonMap) -> Result<()> {
        let now = self.clock.now();
        self.status.start(now);
        self.outputs
            .insert(MAIN_MARKER.to_string(), Output::new(MAIN_MARKER, values, now));
        self.status.mark_main_outputs_loaded(now);
        log_engine_operation("load_main_outputs", "loaded", None);
        Ok(())
    }

    /// Re-attach an interrupted in-flight execution to its step.
    ///
    /// The execution keeps its identity and start time; `run` decides whether
    /// it is still young enough to resume.
    pub fn resume_execution(&mut self, step_name: &str, mut execution: Execution) -> Result<()> {
        if !self.status.status().templates_loaded {
            return Err(EngineError::NotReady(
                "templates must be loaded before resuming executions".to_string(),
            ));
        }
        if !execution.status.is_in_flight() {
            return Err(EngineError::Validation(format!(
                "only pending or running executions can be resumed, got {}",
                execution.status
            )));
        }
        let step_id = self
            .scheduler
            .step_by_name(step_name)
            .map(|s| s.id)
            .ok_or_else(|| EngineError::UnknownStep(step_name.to_string()))?;

        execution.step_id = step_id;
        if execution.status == ExecutionStatus::Running && execution.started_at.is_none() {
            execution.started_at = Some(execution.timestamp);
        }
        self.scheduler.record_attempt(step_id, execution)?;
        debug!(step = step_name, "Interrupted execution attached");
        Ok(())
    }

    /// Run until every step is terminal or the overall timeout ends the run
    #[instrument(skip(self), fields(steps = self.scheduler.steps().len()))]
    pub async fn run(&mut self) -> Result<RunSummary> {
        let now = self.clock.now();
        self.status.start(now);
        if !self.status.can_dispatch() {
            return Err(EngineError::NotReady(
                "templates and main outputs must be loaded before running".to_string(),
            ));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<AttemptReport>();
        let mut overall_error: Option<EngineError> = None;

        self.interrupted = self.scheduler.in_flight_steps().into();

        loop {
            let now = self.clock.now();
            if overall_error.is_none() {
                if let Err(e) = self.status.check_overall_timeout(&self.policy, now) {
                    log_error("engine", "run", &e.to_string(), None);
                    self.publish(events::ENGINE_FATAL, json!({ "reason": e.to_string() }));
                    overall_error = Some(e);
                }
            }

            self.dispatch_interrupted(&tx)?;
            self.dispatch_eligible(&tx, now)?;

            let idle = self.in_flight.is_empty() && self.interrupted.is_empty();
            if idle && (self.status.is_fatal() || self.scheduler.all_terminal()) {
                break;
            }

            let wake_at = self.next_wakeup();
            if idle && wake_at.is_none() {
                break;
            }

            match wake_at {
                Some(at) => {
                    let wait = self.clock.until(at);
                    tokio::select! {
                        report = rx.recv() => {
                            if let Some(report) = report {
                                self.handle_report(report)?;
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None => {
                    if let Some(report) = rx.recv().await {
                        self.handle_report(report)?;
                    }
                }
            }
        }

        let summary = self.summary();
        self.record_run_telemetry(&summary);

        if let Some(e) = overall_error {
            return Err(e);
        }

        let exit_delay = self.policy.engine_exit_delay();
        if !exit_delay.is_zero() {
            debug!(delay = ?exit_delay, "Waiting before engine exit");
            tokio::time::sleep(exit_delay).await;
        }

        self.publish(
            events::ENGINE_FINISHED,
            json!({ "succeeded": summary.succeeded(), "steps": summary.steps.len() }),
        );
        log_engine_operation(
            "run",
            if summary.succeeded() { "succeeded" } else { "failed" },
            None,
        );
        Ok(summary)
    }

    /// Snapshot of the run as it stands
    pub fn summary(&self) -> RunSummary {
        let steps = self
            .scheduler
            .steps()
            .iter()
            .map(|step| {
                let latest = step.latest_execution();
                StepSummary {
                    name: step.name.clone(),
                    status: step.current_status(),
                    attempts: step.attempts(),
                    error: latest.map(|e| e.error.clone()).unwrap_or_default(),
                    code: latest.map(|e| e.code.clone()).unwrap_or_default(),
                }
            })
            .collect();

        RunSummary {
            steps,
            outputs: self.outputs.clone(),
            elapsed: self
                .status
                .elapsed(self.clock.now())
                .unwrap_or(Duration::ZERO),
            fatal: self.status.is_fatal(),
        }
    }

    fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        let retry_at = if self.status.is_fatal() {
            None
        } else {
            self.scheduler.next_retry_at(&self.policy)
        };

        let deadline = match (self.policy.overall_timeout(), self.status.status().first_start) {
            (Some(limit), Some(start)) if !self.status.is_fatal() => {
                chrono::Duration::from_std(limit)
                    .ok()
                    .and_then(|limit| limit.checked_add(&chrono::Duration::milliseconds(1)))
                    .and_then(|limit| start.checked_add_signed(limit))
            }
            _ => None,
        };

        match (retry_at, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Decide how an execution left in flight by a previous process continues
    fn classify_interrupted(&self, execution: &Execution, now: DateTime<Utc>) -> Interrupted {
        if execution.status == ExecutionStatus::Pending {
            return Interrupted::Start;
        }

        let age = execution.running_for(now).unwrap_or(Duration::ZERO);
        let within_window = self
            .policy
            .step_restart_timeout()
            .map_or(true, |window| age <= window);

        if !within_window {
            return Interrupted::Expire("interrupted execution is older than the restart window");
        }
        if !execution.has_resume_token() {
            return Interrupted::Expire("interrupted execution has no resume token");
        }

        let remaining = self
            .policy
            .step_deployment_timeout()
            .map(|limit| limit.saturating_sub(age));
        if remaining.is_some_and(|r| r.is_zero()) {
            return Interrupted::Expire("deployment timeout elapsed while interrupted");
        }
        Interrupted::Resume {
            token: execution.resume_token.clone(),
            remaining,
        }
    }

    /// Restart interrupted executions while concurrency permits are available.
    ///
    /// Runs even in fatal state: these executions are already in flight.
    fn dispatch_interrupted(&mut self, tx: &mpsc::UnboundedSender<AttemptReport>) -> Result<()> {
        while let Some(&step_id) = self.interrupted.front() {
            let now = self.clock.now();
            let Some(execution) = self
                .scheduler
                .step(step_id)
                .and_then(Step::in_flight_execution)
                .cloned()
            else {
                self.interrupted.pop_front();
                continue;
            };

            let plan = self.classify_interrupted(&execution, now);
            if let Interrupted::Expire(reason) = plan {
                self.interrupted.pop_front();
                self.expire_attempt(step_id, execution.id, reason)?;
                continue;
            }

            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            self.interrupted.pop_front();

            match plan {
                Interrupted::Resume { token, remaining } => {
                    self.spawn_call(step_id, execution.id, Some(token), remaining, permit, tx)?;
                    self.publish(
                        events::STEP_RESUMED,
                        json!({ "step_id": step_id, "execution_id": execution.id }),
                    );
                }
                _ => self.start_attempt(step_id, execution.id, permit, tx, now)?,
            }
        }
        Ok(())
    }

    fn dispatch_eligible(
        &mut self,
        tx: &mpsc::UnboundedSender<AttemptReport>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        while self.status.can_dispatch() {
            let Some(step_id) = self
                .scheduler
                .next_eligible_step(self.status.status(), &self.policy, now)
                .map(|step| step.id)
            else {
                break;
            };
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };

            let execution_id = self.scheduler.open_attempt(step_id, now)?.id;
            self.start_attempt(step_id, execution_id, permit, tx, now)?;
        }
        Ok(())
    }

    /// Move a pending execution to running and issue the call
    fn start_attempt(
        &mut self,
        step_id: u64,
        execution_id: u64,
        permit: OwnedSemaphorePermit,
        tx: &mpsc::UnboundedSender<AttemptReport>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let engine_fatal = self.status.is_fatal();
        let step = self
            .scheduler
            .step_mut(step_id)
            .ok_or_else(|| EngineError::UnknownStep(step_id.to_string()))?;
        let retry_count = step.retry_count();
        let attempt = step.attempts();
        let context = AttemptContext {
            step_name: &step.name,
            retry_count,
            engine_fatal,
            now,
        };
        let execution = step
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id)
            .ok_or_else(|| EngineError::StateMachine(format!("execution {execution_id} not found")))?;
        self.state_machine.start(execution, &context)?;

        log_execution_operation(
            "dispatch",
            &step.name,
            execution_id,
            attempt,
            ExecutionStatus::Running.as_str(),
            None,
        );
        let step_name = step.name.clone();

        self.spawn_call(
            step_id,
            execution_id,
            None,
            self.policy.step_deployment_timeout(),
            permit,
            tx,
        )?;
        self.publish(
            events::STEP_DISPATCHED,
            json!({ "step": step_name, "execution_id": execution_id, "attempt": attempt }),
        );
        Ok(())
    }

    fn spawn_call(
        &mut self,
        step_id: u64,
        execution_id: u64,
        resume_token: Option<String>,
        limit: Option<Duration>,
        permit: OwnedSemaphorePermit,
        tx: &mpsc::UnboundedSender<AttemptReport>,
    ) -> Result<()> {
        let step = self
            .scheduler
            .step(step_id)
            .ok_or_else(|| EngineError::UnknownStep(step_id.to_string()))?;

        let request = DeploymentRequest {
            step_name: step.name.clone(),
            template: step.template.clone(),
            parameters: step.parameters.clone(),
            resume_token,
            attempt: u32::try_from(step.attempts()).unwrap_or(u32::MAX),
            correlation_id: Uuid::new_v4(),
        };

        self.in_flight.insert(step_id, execution_id);
        let executor = Arc::clone(&self.executor);
        let tx = tx.clone();

        tokio::spawn(async move {
            let outcome = call_executor(executor, request, limit, permit).await;
            // The receiver only closes once the engine stops running
            let _ = tx.send(AttemptReport {
                step_id,
                execution_id,
                outcome,
            });
        });
        Ok(())
    }

    fn handle_report(&mut self, report: AttemptReport) -> Result<()> {
        self.in_flight.remove(&report.step_id);

        let outcome = match report.outcome {
            CallOutcome::Returned(returned) => Some(DeploymentOutcome::from_executor(returned)),
            CallOutcome::Panicked(message) => Some(DeploymentOutcome::Errored {
                result: None,
                payload: ErrorPayload::structured(message, "ExecutorPanicked", serde_json::Value::Null),
            }),
            CallOutcome::TimedOut => None,
        };

        match outcome {
            Some(outcome) => self.reconcile_attempt(report.step_id, report.execution_id, &outcome),
            None => self.expire_attempt(report.step_id, report.execution_id, "deployment call timed out"),
        }
    }

    fn reconcile_attempt(
        &mut self,
        step_id: u64,
        execution_id: u64,
        outcome: &DeploymentOutcome,
    ) -> Result<()> {
        let now = self.clock.now();
        let engine_fatal = self.status.is_fatal();
        let step = self
            .scheduler
            .step_mut(step_id)
            .ok_or_else(|| EngineError::UnknownStep(step_id.to_string()))?;
        let context = AttemptContext {
            step_name: &step.name,
            retry_count: step.retry_count(),
            engine_fatal,
            now,
        };
        let execution = step
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id)
            .ok_or_else(|| EngineError::StateMachine(format!("execution {execution_id} not found")))?;

        execution.reset_for_reconciliation();
        let reconciled = self.state_machine.reconcile(execution, outcome, &context)?;
        let (step_name, execution) = (step.name.clone(), execution.clone());

        if let Some(output) = reconciled.output {
            self.outputs.insert(output.module_name.clone(), output);
        }
        self.after_transition(
            &step_name,
            &execution,
            &reconciled.transition,
            reconciled.error.as_ref(),
        );
        Ok(())
    }

    /// Time out a running execution through the state machine
    fn expire_attempt(&mut self, step_id: u64, execution_id: u64, reason: &str) -> Result<()> {
        let now = self.clock.now();
        let engine_fatal = self.status.is_fatal();
        let step = self
            .scheduler
            .step_mut(step_id)
            .ok_or_else(|| EngineError::UnknownStep(step_id.to_string()))?;
        let context = AttemptContext {
            step_name: &step.name,
            retry_count: step.retry_count(),
            engine_fatal,
            now,
        };
        let execution = step
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id)
            .ok_or_else(|| EngineError::StateMachine(format!("execution {execution_id} not found")))?;

        warn!(step = context.step_name, execution_id = execution_id, reason = reason, "Timing out execution");
        let failure = self.state_machine.timeout_error(execution, &context);
        let transition = self.state_machine.time_out(execution, &context)?;
        let (step_name, execution) = (step.name.clone(), execution.clone());

        self.after_transition(&step_name, &execution, &transition, Some(&failure));
        Ok(())
    }

    fn after_transition(
        &mut self,
        step_name: &str,
        execution: &Execution,
        transition: &Transition,
        failure: Option<&EngineError>,
    ) {
        let attempts = self
            .scheduler
            .step_by_name(step_name)
            .map(Step::attempts)
            .unwrap_or_default();

        log_execution_operation(
            transition.event,
            step_name,
            execution.id,
            attempts,
            transition.to.as_str(),
            (!execution.error.is_empty()).then_some(execution.error.as_str()),
        );

        let scope = TelemetryScope::step(step_name);
        self.telemetry
            .set(DeploymentMetric::Status, &scope, transition.to.to_string());
        self.telemetry
            .set(DeploymentMetric::Attempts, &scope, attempts.to_string());
        if !execution.duration.is_empty() {
            self.telemetry
                .set(DeploymentMetric::Duration, &scope, execution.duration.clone());
        }
        if !execution.code.is_empty() {
            self.telemetry
                .set(DeploymentMetric::ErrorCode, &scope, execution.code.clone());
        }

        if let Some(failure) = failure {
            warn!(
                step = step_name,
                execution_id = execution.id,
                kind = failure.kind(),
                recoverable = failure.is_recoverable(),
                error = %failure,
                "Attempt failed"
            );
        }
        if transition.to == ExecutionStatus::FatallyFailed {
            error!(step = step_name, "Attempt failed while engine is fatal");
        }

        self.publisher
            .publish_transition(step_name, execution, transition, failure);
    }

    fn record_run_telemetry(&self, summary: &RunSummary) {
        let succeeded = summary
            .steps
            .iter()
            .filter(|s| s.status == Some(ExecutionStatus::Succeeded))
            .count();
        let failed = summary
            .steps
            .iter()
            .filter(|s| s.status.is_some_and(|status| status.is_terminal() && !status.is_success()))
            .count();
        let run = TelemetryScope::Run;

        self.telemetry
            .set(DeploymentMetric::StepsTotal, &run, summary.steps.len().to_string());
        self.telemetry
            .set(DeploymentMetric::StepsSucceeded, &run, succeeded.to_string());
        self.telemetry
            .set(DeploymentMetric::StepsFailed, &run, failed.to_string());
        self.telemetry
            .set(DeploymentMetric::Duration, &run, format_elapsed(summary.elapsed));
        self.telemetry.set(
            DeploymentMetric::Status,
            &run,
            if summary.succeeded() { "Succeeded" } else { "Failed" },
        );
        info!(
            steps = summary.steps.len(),
            succeeded = succeeded,
            failed = failed,
            fatal = summary.fatal,
            "Run finished"
        );
    }

    fn publish(&self, name: &str, context: serde_json::Value) {
        let reached = self.publisher.publish(name, context);
        trace!(event = name, subscribers = reached, "Published engine event");
    }
}

async fn call_executor<E: DeploymentExecutor>(
    executor: Arc<E>,
    request: DeploymentRequest,
    limit: Option<Duration>,
    _permit: OwnedSemaphorePermit,
) -> CallOutcome {
    let mut call = tokio::spawn(async move { executor.deploy(request).await });

    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut call).await {
            Ok(joined) => joined,
            Err(_) => {
                call.abort();
                return CallOutcome::TimedOut;
            }
        },
        None => call.await,
    };

    match joined {
        Ok(returned) => CallOutcome::Returned(returned),
        Err(e) => CallOutcome::Panicked(format!("executor task failed: {e}")),
    }
}
