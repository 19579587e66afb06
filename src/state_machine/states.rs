use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a single execution attempt.
///
/// ```text
/// Pending -> Running -> { Succeeded | Failed | TimedOut | Retrying | FatallyFailed }
/// ```
///
/// `Retrying` closes the attempt record and hands the step back to the
/// scheduler, which opens a new attempt that re-enters `Running`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Attempt created, deployment call not yet issued
    #[default]
    Pending,
    /// Deployment call in flight
    Running,
    /// Deployment completed successfully
    Succeeded,
    /// Deployment failed and the retry budget is exhausted
    Failed,
    /// No result arrived within the deployment timeout and the retry budget is exhausted
    TimedOut,
    /// Recoverable failure; a new attempt will follow after the retry delay
    Retrying,
    /// Failed while the engine was in fatal state; never retried
    FatallyFailed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
            Self::Retrying => "Retrying",
            Self::FatallyFailed => "FatallyFailed",
        }
    }

    /// Check if this is a terminal state (no further attempts for the step)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::FatallyFailed
        )
    }

    /// Check if this attempt is occupying the step's single in-flight slot
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Check if this attempt ended without success (terminal or awaiting retry)
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::TimedOut | Self::Retrying | Self::FatallyFailed
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Running" => Ok(Self::Running),
            "Succeeded" => Ok(Self::Succeeded),
            "Failed" => Ok(Self::Failed),
            "TimedOut" => Ok(Self::TimedOut),
            "Retrying" => Ok(Self::Retrying),
            "FatallyFailed" => Ok(Self::FatallyFailed),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}
