use super::errors::{GuardError, GuardResult};
use crate::models::{EngineStatus, Execution, Step};

/// Trait for implementing state transition guards
pub trait StateGuard<T> {
    /// Check if a transition is allowed
    fn check(&self, entity: &T) -> GuardResult<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// Guard ensuring a completed step never opens another attempt
pub struct StepNotCompleteGuard;

impl StateGuard<Step> for StepNotCompleteGuard {
    fn check(&self, step: &Step) -> GuardResult<()> {
        if step.is_complete() {
            return Err(GuardError::AlreadyComplete {
                step: step.name.clone(),
            });
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Step has no succeeded execution"
    }
}

/// Guard enforcing at most one in-flight execution per step
pub struct StepNotInFlightGuard;

impl StateGuard<Step> for StepNotInFlightGuard {
    fn check(&self, step: &Step) -> GuardResult<()> {
        if step.has_in_flight_execution() {
            return Err(GuardError::ExecutionInFlight {
                step: step.name.clone(),
            });
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Step has no pending or running execution"
    }
}

/// Guard ensuring an execution is attached to the step it was opened for
pub struct ExecutionOwnershipGuard {
    pub step_id: u64,
}

impl StateGuard<Execution> for ExecutionOwnershipGuard {
    fn check(&self, execution: &Execution) -> GuardResult<()> {
        if execution.step_id != self.step_id {
            return Err(GuardError::StepMismatch {
                expected: self.step_id,
                actual: execution.step_id,
            });
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Execution belongs to the step"
    }
}

/// Guard blocking new attempts once the engine is in fatal state
pub struct EngineDispatchGuard;

impl StateGuard<EngineStatus> for EngineDispatchGuard {
    fn check(&self, status: &EngineStatus) -> GuardResult<()> {
        if status.is_fatal_state {
            return Err(GuardError::EngineFatal);
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Engine is not in fatal state"
    }
}
