use crate::error::EngineError;
use thiserror::Error;

/// Error types for execution state machine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: String },

    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Action execution failed: {reason}")]
    ActionFailed { reason: String },
}

/// Specific error type for guard condition failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuardError {
    #[error("Step '{step}' already has an in-flight execution")]
    ExecutionInFlight { step: String },

    #[error("Step '{step}' already completed successfully")]
    AlreadyComplete { step: String },

    #[error("Execution belongs to step {actual}, expected {expected}")]
    StepMismatch { expected: u64, actual: u64 },

    #[error("Engine is in fatal state; no new attempts may start")]
    EngineFatal,
}

/// Specific error type for post-transition action failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("Invalid state for action execution: {state}")]
    InvalidState { state: String },
}

impl From<GuardError> for StateMachineError {
    fn from(err: GuardError) -> Self {
        Self::GuardFailed {
            reason: err.to_string(),
        }
    }
}

impl From<ActionError> for StateMachineError {
    fn from(err: ActionError) -> Self {
        Self::ActionFailed {
            reason: err.to_string(),
        }
    }
}

impl From<StateMachineError> for EngineError {
    fn from(err: StateMachineError) -> Self {
        EngineError::StateMachine(err.to_string())
    }
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type GuardResult<T> = Result<T, GuardError>;
pub type ActionResult<T> = Result<T, ActionError>;
