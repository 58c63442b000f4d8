// Bridge configuration loaded from environment variables

use crate::buffer::DEFAULT_CAPACITY;
use crate::session::{MAX_RATE, MIN_RATE};
use std::env;
use std::path::PathBuf;

/// Runtime configuration, all values optional with sensible defaults
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Serial port the device is attached to
    pub serial_port: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// CSV file replayed to the device
    pub replay_path: PathBuf,
    /// Result buffer retention bound
    pub buffer_capacity: usize,
    /// Default replay rate in records per second
    pub rate_limit: u32,
}

impl BridgeConfig {
    /// Load configuration from `BRIDGE_*` environment variables
    pub fn from_env() -> Self {
        Self {
            serial_port: env::var("BRIDGE_SERIAL_PORT")
                .unwrap_or_else(|_| "/dev/ttyACM0".to_string()),
            baud_rate: env::var("BRIDGE_BAUD_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(115_200),
            replay_path: env::var("BRIDGE_REPLAY_CSV")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("Crawdad.csv")),
            buffer_capacity: env::var("BRIDGE_BUFFER_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CAPACITY),
            rate_limit: env::var("BRIDGE_RATE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20)
                .clamp(MIN_RATE, MAX_RATE),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            replay_path: PathBuf::from("Crawdad.csv"),
            buffer_capacity: DEFAULT_CAPACITY,
            rate_limit: 20,
        }
    }
}
