//! # Deployment Executor
//!
//! The boundary to the provisioning backend. The engine never decides what a
//! step does; it hands the step's template and parameters to a
//! [`DeploymentExecutor`] and reconciles whatever comes back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{DeploymentResult, JsonMap};

/// Everything an executor needs to perform one deployment call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub step_name: String,
    pub template: JsonMap,
    pub parameters: JsonMap,
    /// Continuation marker when resuming an interrupted poll
    pub resume_token: Option<String>,
    /// Attempt number starting at 1
    pub attempt: u32,
    pub correlation_id: Uuid,
}

impl DeploymentRequest {
    pub fn is_resume(&self) -> bool {
        self.resume_token.is_some()
    }
}

/// Error raised by an executor call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    /// The deployment object itself could not be created
    #[error("Deployment was not created: {payload}")]
    NotCreated { payload: String },

    /// The deployment exists but the call reported an error
    #[error("Deployment {} failed: {payload}", result.id)]
    Failed {
        result: Box<DeploymentResult>,
        payload: String,
    },
}

impl ExecutorError {
    pub fn not_created(payload: impl Into<String>) -> Self {
        Self::NotCreated {
            payload: payload.into(),
        }
    }

    pub fn failed(result: DeploymentResult, payload: impl Into<String>) -> Self {
        Self::Failed {
            result: Box::new(result),
            payload: payload.into(),
        }
    }
}

/// Performs the actual provisioning call for a step.
///
/// Implementations must be safe to call concurrently for different steps. The
/// engine never calls an executor twice concurrently for the same step.
#[async_trait]
pub trait DeploymentExecutor: Send + Sync + 'static {
    async fn deploy(&self, request: DeploymentRequest) -> Result<DeploymentResult, ExecutorError>;
}
