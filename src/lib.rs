#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Deployment Engine Core
//!
//! Orchestration core for a sequence of named, prioritized deployment steps
//! run against an external provisioning backend.
//!
//! ## Overview
//!
//! The crate does not perform provisioning itself. It decides when each step
//! runs, hands the call to a [`DeploymentExecutor`](orchestration::DeploymentExecutor),
//! and reconciles whatever comes back into the step's attempt history under a
//! shared retry and timeout policy.
//!
//! ## Module Organization
//!
//! - [`config`] - Policy knobs, control loop settings and layered loading
//! - [`models`] - Steps, executions, outputs, deployment results
//! - [`state_machine`] - Execution status lifecycle with guards and actions
//! - [`orchestration`] - Scheduler, reconciler, status tracker and engine loop
//! - [`telemetry`] - (metric, step) keyed telemetry ledger
//! - [`events`] - Lifecycle event broadcasting
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use chrono::Utc;
//! use deployment_engine::config::EngineConfig;
//! use deployment_engine::models::{DeploymentResult, JsonMap, NewStep};
//! use deployment_engine::orchestration::{
//!     DeploymentEngine, DeploymentExecutor, DeploymentRequest, ExecutorError,
//! };
//! use deployment_engine::state_machine::ExecutionStatus;
//!
//! struct Backend;
//!
//! #[async_trait]
//! impl DeploymentExecutor for Backend {
//!     async fn deploy(&self, request: DeploymentRequest) -> Result<DeploymentResult, ExecutorError> {
//!         Ok(DeploymentResult::new(request.step_name, ExecutionStatus::Succeeded, Utc::now()))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = DeploymentEngine::new(Backend, &EngineConfig::default())?;
//! engine.load_templates(vec![NewStep::new("infra", 1), NewStep::new("app", 2)])?;
//! engine.load_main_outputs(JsonMap::new())?;
//!
//! let summary = engine.run().await?;
//! assert!(summary.succeeded());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod telemetry;

pub use config::{ConfigManager, EngineConfig, EngineConfiguration, EnginePolicy, EngineSettings};
pub use constants::MAIN_MARKER;
pub use error::{EngineError, Result};
pub use events::EventPublisher;
pub use models::{DeploymentResult, Execution, NewStep, Output, Step};
pub use orchestration::{
    DeploymentEngine, DeploymentExecutor, DeploymentOutcome, DeploymentRequest, ExecutorError,
    RunSummary,
};
pub use state_machine::{ExecutionStateMachine, ExecutionStatus};
pub use telemetry::{TelemetryLedger, TelemetryScope};
