//! # Orchestration Types
//!
//! The tagged outcome of one deployment attempt, as handed from the executor
//! boundary to the reconciler.
//!
//! A nilable result next to a separate error string is deliberately not
//! representable here: "no deployment record" is its own variant, so the rule
//! that an absent record always fails is checked by the compiler rather than by
//! convention.

use serde_json::Value;

use super::executor::ExecutorError;
use crate::models::{DeploymentError, DeploymentResult, ErroredDeployment};

/// Outcome of a single deployment call
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentOutcome {
    /// The backend returned a deployment record and raised nothing
    Reported(DeploymentResult),
    /// The call raised an error; the record may or may not exist
    Errored {
        result: Option<DeploymentResult>,
        payload: ErrorPayload,
    },
    /// No deployment record and no error payload
    Absent,
}

/// Error payload attached to a failed call
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPayload {
    /// No payload was attached
    Empty,
    Decoded(DeploymentError),
    /// The payload was present but could not be decoded
    Undecodable { raw: String, reason: String },
}

impl ErrorPayload {
    /// Decode a raw JSON error payload. Only the empty string is
    /// [`ErrorPayload::Empty`]; whitespace is handed to the decoder.
    pub fn decode(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::Empty;
        }
        match ErroredDeployment::from_json(raw) {
            Ok(errored) => Self::Decoded(errored.error),
            Err(e) => Self::Undecodable {
                raw: raw.to_string(),
                reason: e.to_string(),
            },
        }
    }

    /// Payload built directly from structured fields
    pub fn structured(message: impl Into<String>, code: impl Into<String>, details: Value) -> Self {
        Self::Decoded(DeploymentError {
            message: message.into(),
            code: code.into(),
            details,
        })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl DeploymentOutcome {
    /// Build an outcome from an optional record and a raw error payload string
    pub fn from_parts(result: Option<DeploymentResult>, error_json: &str) -> Self {
        let payload = ErrorPayload::decode(error_json);
        match (result, payload) {
            (Some(result), ErrorPayload::Empty) => Self::Reported(result),
            (None, ErrorPayload::Empty) => Self::Absent,
            (result, payload) => Self::Errored { result, payload },
        }
    }

    /// Translate an executor call's return value
    pub fn from_executor(outcome: Result<DeploymentResult, ExecutorError>) -> Self {
        match outcome {
            Ok(result) => Self::Reported(result),
            Err(ExecutorError::NotCreated { payload }) => Self::from_parts(None, &payload),
            Err(ExecutorError::Failed { result, payload }) => {
                Self::from_parts(Some(*result), &payload)
            }
        }
    }

    /// The deployment record, if one exists
    pub fn result(&self) -> Option<&DeploymentResult> {
        match self {
            Self::Reported(result) => Some(result),
            Self::Errored { result, .. } => result.as_ref(),
            Self::Absent => None,
        }
    }

    pub fn payload(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Errored { payload, .. } => Some(payload),
            _ => None,
        }
    }
}
