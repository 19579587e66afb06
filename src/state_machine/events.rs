use serde::{Deserialize, Serialize};

/// Events that drive execution state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ExecutionEvent {
    /// Issue the deployment call
    Start,
    /// Deployment reported success
    Complete,
    /// Deployment failed with a recoverable error
    Fail(String),
    /// No result arrived within the deployment timeout
    TimeOut,
}

impl ExecutionEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::TimeOut => "time_out",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Whether the event goes through the retry-versus-terminal rule
    pub fn is_recoverable_failure(&self) -> bool {
        matches!(self, Self::Fail(_) | Self::TimeOut)
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
