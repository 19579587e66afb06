use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::constants::MAIN_MARKER;

/// Metric names recorded by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeploymentMetric {
    Duration,
    Status,
    Attempts,
    ErrorCode,
    StepsTotal,
    StepsSucceeded,
    StepsFailed,
    Custom(String),
}

impl DeploymentMetric {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Duration => "duration",
            Self::Status => "status",
            Self::Attempts => "attempts",
            Self::ErrorCode => "error_code",
            Self::StepsTotal => "steps_total",
            Self::StepsSucceeded => "steps_succeeded",
            Self::StepsFailed => "steps_failed",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for DeploymentMetric {
    fn from(name: &str) -> Self {
        match name {
            "duration" => Self::Duration,
            "status" => Self::Status,
            "attempts" => Self::Attempts,
            "error_code" => Self::ErrorCode,
            "steps_total" => Self::StepsTotal,
            "steps_succeeded" => Self::StepsSucceeded,
            "steps_failed" => Self::StepsFailed,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for DeploymentMetric {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<DeploymentMetric> for String {
    fn from(metric: DeploymentMetric) -> Self {
        metric.as_str().to_string()
    }
}

impl fmt::Display for DeploymentMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which step a metric belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TelemetryScope {
    /// Stored under [`MAIN_MARKER`]
    Run,
    Step(String),
}

impl TelemetryScope {
    pub fn step(name: impl Into<String>) -> Self {
        Self::Step(name.into())
    }

    /// Key stored in the ledger. A step literally named like the marker maps to
    /// the run scope, which registration prevents.
    pub fn key(&self) -> &str {
        match self {
            Self::Run => MAIN_MARKER,
            Self::Step(name) => name,
        }
    }
}

/// A single ledger row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TelemetryEntry {
    pub metric_name: DeploymentMetric,
    pub step: String,
    pub metric_value: String,
}

/// Concurrent (metric, step) → value store shared by every step evaluation
#[derive(Debug, Clone, Default)]
pub struct TelemetryLedger {
    entries: Arc<DashMap<(DeploymentMetric, String), String>>,
}

impl TelemetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value
    pub fn set(
        &self,
        metric: impl Into<DeploymentMetric>,
        scope: &TelemetryScope,
        value: impl Into<String>,
    ) {
        let metric = metric.into();
        let value = value.into();
        trace!(metric = %metric, step = scope.key(), value = %value, "Telemetry recorded");
        self.entries.insert((metric, scope.key().to_string()), value);
    }

    pub fn get(&self, metric: impl Into<DeploymentMetric>, scope: &TelemetryScope) -> Option<String> {
        self.entries
            .get(&(metric.into(), scope.key().to_string()))
            .map(|value| value.clone())
    }

    /// Run-level value for a metric
    pub fn metric(&self, metric: impl Into<DeploymentMetric>) -> Option<String> {
        self.get(metric, &TelemetryScope::Run)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot ordered by metric then step
    pub fn entries(&self) -> Vec<TelemetryEntry> {
        let mut entries: Vec<TelemetryEntry> = self
            .entries
            .iter()
            .map(|entry| {
                let (metric, step) = entry.key();
                TelemetryEntry {
                    metric_name: metric.clone(),
                    step: step.clone(),
                    metric_value: entry.value().clone(),
                }
            })
            .collect();
        entries.sort();
        entries
    }
}
