use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, info};

use crate::config::EnginePolicy;
use crate::error::{EngineError, Result};
use crate::models::EngineStatus;
use crate::state_machine::guards::EngineDispatchGuard;
use crate::state_machine::StateGuard;

/// Owner of the run's [`EngineStatus`].
///
/// Dispatch is gated on both load milestones and on the engine not being in
/// fatal state. Fatal state is one-way for the lifetime of the tracker.
#[derive(Debug, Clone, Default)]
pub struct EngineStatusTracker {
    status: EngineStatus,
}

impl EngineStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot
    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    /// Record the first start. Later calls keep the original timestamp.
    pub fn start(&mut self, now: DateTime<Utc>) {
        if self.status.first_start.is_none() {
            self.status.first_start = Some(now);
            self.status.record = crate::models::RecordTimestamps::new(now);
            info!(first_start = %now, "Engine started");
        }
    }

    pub fn mark_templates_loaded(&mut self, now: DateTime<Utc>) {
        self.status.templates_loaded = true;
        self.status.record.touch(now);
    }

    pub fn mark_main_outputs_loaded(&mut self, now: DateTime<Utc>) {
        self.status.main_outputs_loaded = true;
        self.status.record.touch(now);
    }

    /// Enter fatal state. Returns `true` only on the call that flipped the flag.
    pub fn enter_fatal_state(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if self.status.is_fatal_state {
            return false;
        }
        self.status.is_fatal_state = true;
        self.status.record.touch(now);
        error!(reason = reason, "Engine entered fatal state");
        true
    }

    pub fn is_fatal(&self) -> bool {
        self.status.is_fatal_state
    }

    /// Whether the scheduler may hand out new attempts
    pub fn can_dispatch(&self) -> bool {
        self.status.templates_loaded
            && self.status.main_outputs_loaded
            && EngineDispatchGuard.check(&self.status).is_ok()
    }

    /// Time since first start
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.status
            .first_start
            .and_then(|started| (now - started).to_std().ok())
    }

    /// Enter fatal state once the overall timeout has passed.
    ///
    /// A disabled overall timeout never trips.
    pub fn check_overall_timeout(&mut self, policy: &EnginePolicy, now: DateTime<Utc>) -> Result<()> {
        let (Some(limit), Some(elapsed)) = (policy.overall_timeout(), self.elapsed(now)) else {
            return Ok(());
        };
        if elapsed <= limit {
            return Ok(());
        }
        self.enter_fatal_state("overall timeout exceeded", now);
        Err(EngineError::OverallTimeoutExceeded { elapsed, limit })
    }
}
