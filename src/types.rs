// Common types for the telemetry bridge

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur in the bridge
///
/// Only `AlreadyActive` and `NoActiveStream` cross the query surface; every
/// other variant is absorbed and logged at the task that produced it.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Replay source not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Stream already active")]
    AlreadyActive,

    #[error("No active stream")]
    NoActiveStream,
}

/// Lifecycle state of a replay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Streaming,
    Stopping,
}

/// Point-in-time snapshot of the session, readable without blocking the worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStatus {
    pub active: bool,
    pub records_sent: u64,
    pub records_received: usize,
    pub rate_limit: u32,
}

/// Final counts returned when a replay session stops
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StopSummary {
    pub records_sent: u64,
    pub records_received: usize,
}

/// Aggregated signal quality statistics over the buffered results
///
/// Averages are rounded to 2 decimal places, the anomaly rate to 4.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalStats {
    pub total_records: usize,
    pub avg_rsrp: f64,
    pub avg_rsrq: f64,
    pub avg_rssi: f64,
    pub avg_sinr: f64,
    pub min_rsrp: i32,
    pub max_rsrp: i32,
    pub min_sinr: i32,
    pub max_sinr: i32,
    pub anomaly_count: usize,
    pub anomaly_rate: f64,
}

/// Split of device-calculated vs. source-measured RSSI values
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RssiOriginStats {
    pub total_records: usize,
    pub measured_count: usize,
    pub calculated_count: usize,
    pub calculated_percentage: f64,
    pub measured_rssi_avg: Option<f64>,
    pub calculated_rssi_avg: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_errors_have_stable_messages() {
        assert_eq!(BridgeError::AlreadyActive.to_string(), "Stream already active");
        assert_eq!(BridgeError::NoActiveStream.to_string(), "No active stream");
    }

    #[test]
    fn session_state_defaults_to_idle() {
        assert_eq!(SessionState::default(), SessionState::Idle);
    }
}
