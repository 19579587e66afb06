//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the
//! `config` crate, later sources overriding earlier ones:
//!
//! 1. `deployment-engine.yaml` (required)
//! 2. `deployment-engine.<environment>.yaml` (optional)
//! 3. `DEPLOY_ENGINE__<SECTION>__<KEY>` environment variables
//!
//! The merged result is validated into an [`EnginePolicy`] before a manager is
//! handed out, so a manager never holds an invalid policy.

use super::error::{ConfigResult, ConfigurationError};
use super::{EngineConfig, EnginePolicy, EngineSettings};
use crate::constants::system::{CONFIG_FILE_STEM, DEFAULT_ENVIRONMENT, ENV_PREFIX, ENV_VAR};
use crate::error::Result;
use ::config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Loaded and validated engine configuration
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: EngineConfig,
    policy: EnginePolicy,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment,
    /// reading overrides from the process environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> Result<Arc<ConfigManager>> {
        Self::load_with_overrides(config_dir, environment, None)
    }

    /// Load configuration with an explicit override map standing in for the
    /// process environment. Keys use the same `DEPLOY_ENGINE__SECTION__KEY` form.
    ///
    /// This is useful for testing without modifying global environment variables.
    pub fn load_with_overrides(
        config_dir: Option<PathBuf>,
        environment: &str,
        overrides: Option<HashMap<String, String>>,
    ) -> Result<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment, overrides)?;
        let policy = config.validate()?;

        info!(
            environment = %environment,
            max_concurrent_steps = config.engine.max_concurrent_steps,
            step_max_retries = policy.step_max_retries(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            policy,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the validated run policy
    pub fn policy(&self) -> EnginePolicy {
        self.policy
    }

    /// Get the control loop settings
    pub fn settings(&self) -> EngineSettings {
        self.config.engine
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// JSON view of the configuration for debugging output
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::json!({
            "environment": self.environment,
            "config_directory": self.config_directory.display().to_string(),
            "config": self.config,
            "policy": self.policy,
        })
    }

    /// Detect current environment from environment variables
    pub fn detect_environment() -> String {
        env::var(ENV_VAR)
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        if let Ok(dir) = env::var(format!("{ENV_PREFIX}_CONFIG_DIR")) {
            return PathBuf::from(dir);
        }
        PathBuf::from("config")
    }

    /// Find the base configuration file
    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for extension in ["yaml", "yml"] {
            let config_path = config_directory.join(format!("{CONFIG_FILE_STEM}.{extension}"));
            searched_paths.push(config_path.clone());

            if config_path.is_file() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
        overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<EngineConfig> {
        let base_file = Self::find_config_file(config_directory)?;
        let env_file = config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.yaml"));

        let mut env_source = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);
        if let Some(overrides) = overrides {
            env_source = env_source.source(Some(overrides.into_iter().collect()));
        }

        let layered = Config::builder()
            .add_source(File::from(base_file.as_path()).format(FileFormat::Yaml))
            .add_source(
                File::from(env_file.as_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(env_source)
            .build()
            .map_err(|e| ConfigurationError::invalid_source(base_file.display().to_string(), e))?;

        layered
            .try_deserialize::<EngineConfig>()
            .map_err(|e| ConfigurationError::environment_config_error(environment, e))
    }
}
