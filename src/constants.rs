//! # System Constants
//!
//! Fixed names shared between the engine components: the run-level telemetry
//! sentinel, lifecycle event names and configuration discovery names.

/// Step name used for run-level (non step-scoped) telemetry.
///
/// Storage-layer equality on empty strings is unreliable, so run-level metrics
/// are keyed by this non-empty marker. It can never be registered as a real
/// step name.
pub const MAIN_MARKER: &str = "xxmainxx";

/// Lifecycle events published by the engine
pub mod events {
    pub const STEP_DISPATCHED: &str = "step.dispatched";
    pub const STEP_RESUMED: &str = "step.resumed";
    pub const EXECUTION_RECONCILED: &str = "execution.reconciled";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const STEP_RETRY_SCHEDULED: &str = "step.retry_scheduled";
    pub const ENGINE_FATAL: &str = "engine.fatal";
    pub const ENGINE_FINISHED: &str = "engine.finished";
}

/// System-wide constants
pub mod system {
    /// Base name of the configuration file (`<name>.yaml`, `<name>.<env>.yaml`)
    pub const CONFIG_FILE_STEM: &str = "deployment-engine";

    /// Prefix for environment variable overrides (`DEPLOY_ENGINE__POLICY__STEP_MAX_RETRIES`)
    pub const ENV_PREFIX: &str = "DEPLOY_ENGINE";

    /// Environment variable naming the active environment
    pub const ENV_VAR: &str = "DEPLOY_ENGINE_ENV";

    /// Default environment when none is configured
    pub const DEFAULT_ENVIRONMENT: &str = "development";
}
