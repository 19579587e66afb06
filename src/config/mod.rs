//! # Engine Configuration
//!
//! Configuration for a deployment run, split into two parts:
//!
//! - [`EngineConfiguration`]: the six raw policy knobs exactly as the external
//!   record carries them (signed seconds and a retry count).
//! - [`EngineSettings`]: process-level settings for the control loop
//!   (concurrency limit and priority ordering).
//!
//! Raw knobs never reach the scheduler or the state machine directly. They are
//! validated once into an immutable [`EnginePolicy`], which is shared read-only
//! across every concurrent step evaluation for the lifetime of the run.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deployment_engine::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let policy = manager.policy();
//! println!("retry limit: {}", policy.step_max_retries());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EngineError, Result};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `deployment-engine.yaml`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    /// Timeouts and retry limits governing every execution
    #[serde(default)]
    pub policy: EngineConfiguration,

    /// Control loop settings
    #[serde(default)]
    pub engine: EngineSettings,
}

impl EngineConfig {
    /// Parse the camelCase JSON shape of an external engine configuration record
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::json_error("engine config", e))
    }

    /// Validate settings and produce the immutable run policy
    pub fn validate(&self) -> Result<EnginePolicy> {
        self.engine.validate()?;
        self.policy.validate()
    }
}

/// Raw engine policy record.
///
/// Every value is in whole seconds except `step_max_retries`. Field names accept
/// both the snake_case config-file form and the camelCase external JSON form.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfiguration {
    #[serde(alias = "stepRestartTimeoutSec")]
    pub step_restart_timeout_sec: i64,

    #[serde(alias = "overallTimeoutSec")]
    pub overall_timeout_sec: i64,

    #[serde(alias = "engineExitDelaySec")]
    pub engine_exit_delay_sec: i64,

    #[serde(alias = "autoRetryDelaySec")]
    pub auto_retry_delay_sec: i64,

    #[serde(alias = "stepDeploymentTimeoutSec")]
    pub step_deployment_timeout_sec: i64,

    #[serde(alias = "stepMaxRetries")]
    pub step_max_retries: i64,
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            step_restart_timeout_sec: 1800,
            overall_timeout_sec: 14400,
            engine_exit_delay_sec: 0,
            auto_retry_delay_sec: 30,
            step_deployment_timeout_sec: 7200,
            step_max_retries: 3,
        }
    }
}

fn non_negative_secs(field: &'static str, value: i64) -> Result<Duration> {
    u64::try_from(value)
        .map(Duration::from_secs)
        .map_err(|_| EngineError::InvalidPolicy {
            field,
            reason: format!("must be non-negative, got {value}"),
        })
}

impl EngineConfiguration {
    /// Validate the raw knobs into an [`EnginePolicy`].
    ///
    /// A zero timeout or delay disables it. A non-zero overall timeout must be
    /// at least as long as each per-step timeout it bounds.
    pub fn validate(&self) -> Result<EnginePolicy> {
        let step_restart_timeout =
            non_negative_secs("step_restart_timeout_sec", self.step_restart_timeout_sec)?;
        let overall_timeout = non_negative_secs("overall_timeout_sec", self.overall_timeout_sec)?;
        let engine_exit_delay =
            non_negative_secs("engine_exit_delay_sec", self.engine_exit_delay_sec)?;
        let auto_retry_delay = non_negative_secs("auto_retry_delay_sec", self.auto_retry_delay_sec)?;
        let step_deployment_timeout = non_negative_secs(
            "step_deployment_timeout_sec",
            self.step_deployment_timeout_sec,
        )?;
        let step_max_retries =
            u32::try_from(self.step_max_retries).map_err(|_| EngineError::InvalidPolicy {
                field: "step_max_retries",
                reason: format!(
                    "must be between 0 and {}, got {}",
                    u32::MAX,
                    self.step_max_retries
                ),
            })?;

        if !overall_timeout.is_zero() {
            for (field, bounded) in [
                ("step_deployment_timeout_sec", step_deployment_timeout),
                ("step_restart_timeout_sec", step_restart_timeout),
            ] {
                if bounded > overall_timeout {
                    return Err(EngineError::InvalidPolicy {
                        field,
                        reason: format!(
                            "({}s) exceeds overall_timeout_sec ({}s)",
                            bounded.as_secs(),
                            overall_timeout.as_secs()
                        ),
                    });
                }
            }
        }

        Ok(EnginePolicy {
            step_restart_timeout,
            overall_timeout,
            engine_exit_delay,
            auto_retry_delay,
            step_deployment_timeout,
            step_max_retries,
        })
    }
}

/// Validated, immutable engine policy for one run.
///
/// `Copy` so it can be handed to every spawned step evaluation without
/// synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnginePolicy {
    step_restart_timeout: Duration,
    overall_timeout: Duration,
    engine_exit_delay: Duration,
    auto_retry_delay: Duration,
    step_deployment_timeout: Duration,
    step_max_retries: u32,
}

impl EnginePolicy {
    /// Maximum age of an interrupted in-flight execution that may still be resumed
    pub fn step_restart_timeout(&self) -> Option<Duration> {
        enabled(self.step_restart_timeout)
    }

    /// Wall-clock budget for the whole run, measured from first start
    pub fn overall_timeout(&self) -> Option<Duration> {
        enabled(self.overall_timeout)
    }

    pub fn engine_exit_delay(&self) -> Duration {
        self.engine_exit_delay
    }

    pub fn auto_retry_delay(&self) -> Duration {
        self.auto_retry_delay
    }

    /// Budget for a single deployment call, measured from entering `Running`
    pub fn step_deployment_timeout(&self) -> Option<Duration> {
        enabled(self.step_deployment_timeout)
    }

    /// Number of automatic retries after the first attempt. Zero disables retry.
    pub fn step_max_retries(&self) -> u32 {
        self.step_max_retries
    }

    /// Upper bound on executions a step can produce before becoming terminal
    pub fn max_attempts(&self) -> u32 {
        self.step_max_retries.saturating_add(1)
    }
}

impl Default for EnginePolicy {
    fn default() -> Self {
        // The default raw configuration always validates.
        let raw = EngineConfiguration::default();
        Self {
            step_restart_timeout: Duration::from_secs(raw.step_restart_timeout_sec as u64),
            overall_timeout: Duration::from_secs(raw.overall_timeout_sec as u64),
            engine_exit_delay: Duration::from_secs(raw.engine_exit_delay_sec as u64),
            auto_retry_delay: Duration::from_secs(raw.auto_retry_delay_sec as u64),
            step_deployment_timeout: Duration::from_secs(raw.step_deployment_timeout_sec as u64),
            step_max_retries: raw.step_max_retries as u32,
        }
    }
}

fn enabled(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

/// Direction in which step priority values are dispatched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityOrder {
    /// Lower priority value runs first
    #[default]
    Ascending,
    /// Higher priority value runs first
    Descending,
}

/// Control loop settings
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    /// Engine-wide limit on concurrently running executions across steps
    pub max_concurrent_steps: usize,

    /// Ordering applied to step priority values
    pub priority_order: PriorityOrder,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 4,
            priority_order: PriorityOrder::Ascending,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_steps == 0 {
            return Err(EngineError::Validation(
                "engine.max_concurrent_steps must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
