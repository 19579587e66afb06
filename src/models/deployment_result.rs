//! # Deployment Results
//!
//! What the external executor reports back for an attempt: the deployment
//! record itself ([`DeploymentResult`]) and the structured error payload
//! ([`ErroredDeployment`]) the backend attaches to failed calls.
//!
//! Also home of duration normalization. Backends report elapsed time as
//! ISO-8601 durations (`PT1M30.5S`) or bare seconds; the engine stores a single
//! display form, `HH:MM:SS` with an optional `.mmm` suffix. Hours are not
//! wrapped into days. Input that cannot be parsed is kept verbatim so the stored
//! value is never confused with "unset" (the empty string).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::JsonMap;
use crate::state_machine::ExecutionStatus;

/// Deployment record reported by the external backend for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    /// External deployment instance identifier
    pub id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub provisioning_state: String,
    /// Elapsed time in the backend's own representation; empty when unknown
    #[serde(default)]
    pub duration: String,
    /// Output values published by the deployment
    #[serde(default)]
    pub outputs: JsonMap,
}

impl DeploymentResult {
    /// Convenience constructor for a result with the given status
    pub fn new(id: impl Into<String>, status: ExecutionStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status,
            correlation_id: String::new(),
            timestamp,
            provisioning_state: String::new(),
            duration: String::new(),
            outputs: JsonMap::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_provisioning_state(mut self, state: impl Into<String>) -> Self {
        self.provisioning_state = state.into();
        self
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = duration.into();
        self
    }

    pub fn with_outputs(mut self, outputs: JsonMap) -> Self {
        self.outputs = outputs;
        self
    }
}

/// Error payload attached to a failed deployment call
///
/// ```json
/// {"error": {"message": "quota exceeded", "code": "QuotaExceeded", "details": [...]}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErroredDeployment {
    pub error: DeploymentError,
}

/// Structured body of an [`ErroredDeployment`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub details: Value,
}

impl ErroredDeployment {
    /// Decode a raw error payload
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl DeploymentError {
    /// Detail structure rendered as a string; empty when the payload has none
    pub fn detail_string(&self) -> String {
        match &self.details {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Normalize an external duration into the engine's display format.
///
/// Empty input stays empty (unset).
pub fn format_deployment_duration(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    match parse_iso8601_duration(trimmed).or_else(|| parse_plain_seconds(trimmed)) {
        Some(duration) => format_elapsed(duration),
        None => trimmed.to_string(),
    }
}

/// Render an elapsed duration in the display format
pub fn format_elapsed(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let millis = duration.subsec_millis();
    if millis == 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    }
}

fn parse_plain_seconds(raw: &str) -> Option<Duration> {
    let number = raw.strip_suffix('s').unwrap_or(raw);
    let seconds: f64 = number.parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

/// Parse `PnW`, `PnDTnHnMnS` style durations. Years and months have no fixed
/// length and are rejected.
fn parse_iso8601_duration(raw: &str) -> Option<Duration> {
    let upper = raw.to_ascii_uppercase();
    let body = upper.strip_prefix('P')?;
    if body.is_empty() {
        return None;
    }

    let mut seconds = 0f64;
    let mut in_time = false;
    let mut number = String::new();
    let mut saw_component = false;

    for c in body.chars() {
        match c {
            'T' if !in_time && number.is_empty() => in_time = true,
            '0'..='9' | '.' | ',' => number.push(if c == ',' { '.' } else { c }),
            unit => {
                let value: f64 = number.parse().ok()?;
                number.clear();
                let scale = match (in_time, unit) {
                    (false, 'W') => 7.0 * 86_400.0,
                    (false, 'D') => 86_400.0,
                    (true, 'H') => 3_600.0,
                    (true, 'M') => 60.0,
                    (true, 'S') => 1.0,
                    _ => return None,
                };
                seconds += value * scale;
                saw_component = true;
            }
        }
    }

    if !number.is_empty() || !saw_component {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}
