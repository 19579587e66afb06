use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigurationError;

/// Crate-level error taxonomy for the deployment engine.
///
/// Only configuration-time validation failures and the overall run timeout end a
/// run. Failures of a single step are recoverable: they are absorbed into that
/// step's execution records, drive the retry policy and are attached to the
/// published transition event instead of surfacing from [`run`].
///
/// [`run`]: crate::orchestration::DeploymentEngine::run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid engine policy: {field} {reason}")]
    InvalidPolicy { field: &'static str, reason: String },

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("Step name '{0}' is reserved for run-level telemetry")]
    ReservedStepName(String),

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Engine is not ready to dispatch: {0}")]
    NotReady(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Unable to decode deployment error payload: {0}")]
    ErrorPayloadDecode(String),

    #[error("Step '{step}' timed out after {after:?}")]
    Timeout { step: String, after: Duration },

    #[error("Overall run timeout exceeded: {elapsed:?} elapsed, limit {limit:?}")]
    OverallTimeoutExceeded { elapsed: Duration, limit: Duration },

    #[error("State machine error: {0}")]
    StateMachine(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl EngineError {
    /// Whether this error aborts the whole run rather than a single attempt.
    pub fn is_run_terminating(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InvalidPolicy { .. }
                | Self::DuplicateStep(_)
                | Self::ReservedStepName(_)
                | Self::NotReady(_)
                | Self::Configuration(_)
                | Self::OverallTimeoutExceeded { .. }
        )
    }

    /// Short machine-readable name of the variant, used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InvalidPolicy { .. } => "invalid_policy",
            Self::DuplicateStep(_) => "duplicate_step",
            Self::ReservedStepName(_) => "reserved_step_name",
            Self::UnknownStep(_) => "unknown_step",
            Self::NotReady(_) => "not_ready",
            Self::Executor(_) => "executor",
            Self::ErrorPayloadDecode(_) => "error_payload_decode",
            Self::Timeout { .. } => "timeout",
            Self::OverallTimeoutExceeded { .. } => "overall_timeout",
            Self::StateMachine(_) => "state_machine",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Whether the error is absorbed into an execution record and retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Executor(_) | Self::ErrorPayloadDecode(_) | Self::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
