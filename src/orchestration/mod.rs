//! # Orchestration Engine
//!
//! Step dispatch, result reconciliation and run control for a deployment.
//!
//! ## Core Components
//!
//! - **StepScheduler**: priority-ordered step set, attempt histories and eligibility
//! - **ResultReconciler**: merges executor outcomes into execution records
//! - **EngineStatusTracker**: load milestones, fatal state and overall timeout
//! - **DeploymentEngine**: the control loop driving a [`DeploymentExecutor`]
//!
//! The execution lifecycle itself lives in [`crate::state_machine`].

pub mod deployment_engine;
pub mod engine_status;
pub mod executor;
pub mod result_reconciler;
pub mod step_scheduler;
pub mod types;

pub use deployment_engine::{DeploymentEngine, EngineClock, RunSummary, StepSummary};
pub use engine_status::EngineStatusTracker;
pub use executor::{DeploymentExecutor, DeploymentRequest, ExecutorError};
pub use result_reconciler::{Reconciliation, ResultReconciler};
pub use step_scheduler::StepScheduler;
pub use types::{DeploymentOutcome, ErrorPayload};
