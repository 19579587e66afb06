//! # Data Layer
//!
//! Records produced and consumed by the orchestration core. Persistence is
//! handled by an external store; these types carry the persisted shape (serde
//! names match the external JSON form) but no storage logic.

pub mod deployment_result;
pub mod engine_status;
pub mod execution;
pub mod output;
pub mod record;
pub mod step;

/// Opaque JSON object payload (templates, parameters, output values)
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

pub use deployment_result::{
    format_deployment_duration, format_elapsed, DeploymentError, DeploymentResult, ErroredDeployment,
};
pub use engine_status::EngineStatus;
pub use execution::Execution;
pub use output::Output;
pub use record::RecordTimestamps;
pub use step::{NewStep, Step};
