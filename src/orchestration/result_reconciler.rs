//! # Result Reconciler
//!
//! Merges a [`DeploymentOutcome`] into an execution record.
//!
//! The merge overwrites, it never accumulates. Applying the same outcome to two
//! pristine scaffolds yields identical records, but applying it to an already
//! reconciled execution does not compose, so callers must reconcile into a
//! fresh scaffold or call [`Execution::reset_for_reconciliation`] first.
//!
//! Fields are written in a fixed order:
//!
//! 1. The resume token is cleared.
//! 2. With a deployment record, its status and identity fields are copied and
//!    the duration is normalized. Without one, the status is forced to
//!    `Failed` whatever the payload says.
//! 3. A decoded error payload fills message, detail and code. A payload that
//!    fails to decode leaves only the decode error as the message.
//!
//! Step 3 runs even when step 2 copied `Succeeded`, so a succeeded record can
//! carry error fields.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{DeploymentOutcome, ErrorPayload};
use crate::models::{format_deployment_duration, DeploymentResult, Execution};
use crate::state_machine::ExecutionStatus;

/// What reconciliation wrote, for the state machine to act on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Status written by reconciliation before lifecycle rules are applied
    pub status: ExecutionStatus,
    /// Decode failure text when the error payload could not be parsed
    pub decode_error: Option<String>,
}

pub struct ResultReconciler;

impl ResultReconciler {
    pub fn reconcile(execution: &mut Execution, outcome: &DeploymentOutcome) -> Reconciliation {
        execution.resume_token.clear();

        match outcome.result() {
            Some(result) => Self::copy_result(execution, result),
            None => execution.status = ExecutionStatus::Failed,
        }

        let decode_error = match outcome.payload() {
            Some(ErrorPayload::Decoded(error)) => {
                execution.error = error.message.clone();
                execution.error_details = error.detail_string();
                execution.code = error.code.clone();
                None
            }
            Some(ErrorPayload::Undecodable { raw, reason }) => {
                warn!(
                    execution_id = execution.id,
                    step_id = execution.step_id,
                    payload_len = raw.len(),
                    error = %reason,
                    "Unable to decode deployment error payload"
                );
                execution.error = reason.clone();
                Some(reason.clone())
            }
            Some(ErrorPayload::Empty) | None => None,
        };

        debug!(
            execution_id = execution.id,
            status = %execution.status,
            code = %execution.code,
            "Reconciled deployment outcome"
        );

        Reconciliation {
            status: execution.status,
            decode_error,
        }
    }

    fn copy_result(execution: &mut Execution, result: &DeploymentResult) {
        execution.status = result.status;
        execution.deployment_id = result.id.clone();
        execution.correlation_id = result.correlation_id.clone();
        execution.timestamp = result.timestamp;
        execution.provisioning_state = result.provisioning_state.clone();
        if !result.duration.is_empty() {
            execution.duration = format_deployment_duration(&result.duration);
        }
    }
}
