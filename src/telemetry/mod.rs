//! # Telemetry
//!
//! Named metric values keyed by (metric, step). Writes overwrite; there is no
//! history. Run-level metrics use the [`MAIN_MARKER`](crate::constants::MAIN_MARKER)
//! step name.

pub mod ledger;

pub use ledger::{DeploymentMetric, TelemetryEntry, TelemetryLedger, TelemetryScope};
