// Serial telemetry bridge
//
// Replays recorded LTE signal measurements to an embedded device over a
// newline-delimited serial protocol, receives per-record processing results
// back over the same link, buffers them in a bounded in-memory store, and
// serves filtered/aggregated views of that store.
//
// Architecture:
// - `protocol`: line codec for frames received from and commands sent to the device
// - `link`: serial port ownership, read loop, and dispatch
// - `replay`: rate-limited CSV replay worker
// - `buffer`: bounded result store and query surface
// - `session`: start/stop lifecycle and status
// - `config`: environment-driven configuration

pub mod buffer;
pub mod config;
pub mod link;
pub mod protocol;
pub mod replay;
pub mod session;
pub mod types;

pub use buffer::ResultBuffer;
pub use config::BridgeConfig;
pub use link::DeviceLink;
pub use protocol::{Command, Frame, ResultFrame, ResultRecord, SnapshotFrame, SourceRecord};
pub use session::SessionManager;
pub use types::{
    BridgeError, BridgeResult, RssiOriginStats, SessionState, SessionStatus, SignalStats,
    StopSummary,
};
