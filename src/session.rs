// Stream session manager: start/stop lifecycle over the replay worker
//
// One replay session at a time. `start` claims the session under the lock and
// spawns the worker; `stop` cancels it and waits a bounded time before
// abandoning it. The worker itself marks the session idle when it exits, so a
// replay that runs to completion needs no explicit stop.

use crate::buffer::ResultBuffer;
use crate::link::DeviceLink;
use crate::protocol::{Command, ResultRecord};
use crate::replay::run_replay;
use crate::types::{
    BridgeError, BridgeResult, RssiOriginStats, SessionState, SessionStatus, SignalStats,
    StopSummary,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Allowed replay rate range, records per second; requests are clamped
pub const MIN_RATE: u32 = 1;
pub const MAX_RATE: u32 = 50;

/// Bounded wait for the worker on stop; past this it is abandoned
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Most records a single tail query returns
pub const MAX_TAIL: usize = 100;

/// State shared between the manager and the replay worker
pub(crate) struct SessionShared {
    pub(crate) state: Mutex<SessionState>,
    pub(crate) records_sent: AtomicU64,
    pub(crate) rate_limit: AtomicU32,
}

impl SessionShared {
    pub(crate) fn mark_idle(&self) {
        *self.state.lock() = SessionState::Idle;
    }
}

/// Owns the replay lifecycle and fronts the query surface over the buffer
pub struct SessionManager {
    link: Arc<DeviceLink>,
    buffer: Arc<ResultBuffer>,
    replay_path: PathBuf,
    shared: Arc<SessionShared>,
    cancel: Mutex<CancellationToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(link: Arc<DeviceLink>, buffer: Arc<ResultBuffer>, replay_path: PathBuf) -> Self {
        Self {
            link,
            buffer,
            replay_path,
            shared: Arc::new(SessionShared {
                state: Mutex::new(SessionState::Idle),
                records_sent: AtomicU64::new(0),
                rate_limit: AtomicU32::new(MIN_RATE),
            }),
            cancel: Mutex::new(CancellationToken::new()),
            worker: Mutex::new(None),
        }
    }

    /// Start a replay session at `rate_limit` records/sec (clamped to
    /// [`MIN_RATE`]..=[`MAX_RATE`]). Returns the effective rate immediately;
    /// the worker streams in the background.
    pub async fn start(&self, rate_limit: u32) -> BridgeResult<u32> {
        let rate = rate_limit.clamp(MIN_RATE, MAX_RATE);

        // Claim the session under the lock so concurrent starts cannot race
        let cancel = {
            let mut state = self.shared.state.lock();
            if *state != SessionState::Idle {
                return Err(BridgeError::AlreadyActive);
            }
            *state = SessionState::Streaming;
            self.shared.records_sent.store(0, Ordering::Relaxed);
            self.shared.rate_limit.store(rate, Ordering::Relaxed);
            let token = CancellationToken::new();
            *self.cancel.lock() = token.clone();
            token
        };

        self.link.send_command(Command::StreamStart).await;
        // give the firmware a beat to arm before rows arrive
        tokio::time::sleep(Duration::from_millis(100)).await;

        let worker = tokio::spawn(run_replay(
            Arc::clone(&self.link),
            self.replay_path.clone(),
            rate,
            cancel,
            Arc::clone(&self.shared),
        ));
        *self.worker.lock() = Some(worker);

        log::info!("Replay session started at {} records/sec", rate);
        Ok(rate)
    }

    /// Stop the active session and return final counts.
    ///
    /// Waits up to [`STOP_TIMEOUT`] for the worker; a worker that does not
    /// exit in time is abandoned and the session still reports stopped.
    pub async fn stop(&self) -> BridgeResult<StopSummary> {
        {
            let mut state = self.shared.state.lock();
            if *state == SessionState::Idle {
                return Err(BridgeError::NoActiveStream);
            }
            *state = SessionState::Stopping;
        }

        self.cancel.lock().cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if tokio::time::timeout(STOP_TIMEOUT, worker).await.is_err() {
                log::warn!(
                    "Replay worker did not exit within {:?}; abandoning it",
                    STOP_TIMEOUT
                );
            }
        }
        self.shared.mark_idle();

        self.link.send_command(Command::StreamStop).await;

        let summary = StopSummary {
            records_sent: self.shared.records_sent.load(Ordering::Relaxed),
            records_received: self.buffer.len(),
        };
        log::info!(
            "Replay session stopped: sent {}, received {}",
            summary.records_sent,
            summary.records_received
        );
        Ok(summary)
    }

    /// Point-in-time status; never blocks on the worker
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            active: *self.shared.state.lock() == SessionState::Streaming,
            records_sent: self.shared.records_sent.load(Ordering::Relaxed),
            records_received: self.buffer.len(),
            rate_limit: self.shared.rate_limit.load(Ordering::Relaxed),
        }
    }

    // ----- query surface over the result buffer -----

    /// Most recent `n` results, `n` clamped to 1..=[`MAX_TAIL`]
    pub fn tail(&self, n: usize) -> Vec<ResultRecord> {
        self.buffer.tail(n.clamp(1, MAX_TAIL))
    }

    pub fn filter_by_quality(&self, min_rsrp: i32, min_sinr: i32) -> Vec<ResultRecord> {
        self.buffer.filter_by_quality(min_rsrp, min_sinr)
    }

    pub fn anomalies(&self) -> Vec<ResultRecord> {
        self.buffer.anomalies()
    }

    pub fn stats(&self) -> Option<SignalStats> {
        self.buffer.stats()
    }

    pub fn rssi_origin_stats(&self) -> Option<RssiOriginStats> {
        self.buffer.rssi_origin_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    const CSV_HEADER: &str = "Time,Latitude,Longitude,Elevation,PCI,Cell_Id,RSRP,RSRQ,RSSI,SINR";

    fn write_source(rows: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "{}", CSV_HEADER).unwrap();
        for i in 0..rows {
            writeln!(
                file,
                "2013-11-28 09:36:{:02},47.81,13.04,420.5,101,3456,-85,-10,-60,12",
                i % 60
            )
            .unwrap();
        }
        file
    }

    fn manager(path: PathBuf) -> (SessionManager, DuplexStream) {
        let buffer = Arc::new(ResultBuffer::new(100));
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let link = Arc::new(DeviceLink::from_transport(ours, Arc::clone(&buffer)));
        (SessionManager::new(link, buffer, path), theirs)
    }

    async fn wait_until_idle(session: &SessionManager) {
        for _ in 0..400 {
            if !session.status().active {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never went idle");
    }

    #[tokio::test]
    async fn rate_limit_is_clamped() {
        let source = write_source(1);
        let (session, _theirs) = manager(source.path().to_path_buf());

        assert_eq!(session.start(0).await.unwrap(), 1);
        assert_eq!(session.status().rate_limit, 1);
        wait_until_idle(&session).await;

        assert_eq!(session.start(999).await.unwrap(), 50);
        assert_eq!(session.status().rate_limit, 50);
        wait_until_idle(&session).await;
    }

    #[tokio::test]
    async fn start_while_streaming_is_rejected() {
        let source = write_source(200);
        let (session, _theirs) = manager(source.path().to_path_buf());

        session.start(1).await.unwrap();
        let first_sent = session.status().records_sent;

        match session.start(10).await {
            Err(BridgeError::AlreadyActive) => {}
            other => panic!("expected AlreadyActive, got {:?}", other.map(|_| ())),
        }
        // the rejected start must not touch the running session's counters
        assert_eq!(session.status().rate_limit, 1);
        assert!(session.status().records_sent >= first_sent);

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_while_idle_is_rejected() {
        let source = write_source(1);
        let (session, _theirs) = manager(source.path().to_path_buf());

        match session.stop().await {
            Err(BridgeError::NoActiveStream) => {}
            other => panic!("expected NoActiveStream, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn replay_sends_every_row_then_goes_idle() {
        let source = write_source(3);
        let (session, theirs) = manager(source.path().to_path_buf());

        let started = std::time::Instant::now();
        session.start(10).await.unwrap();
        wait_until_idle(&session).await;

        assert_eq!(session.status().records_sent, 3);
        // 3 sends at 10/sec spaced >= 0.1s apart
        assert!(started.elapsed() >= Duration::from_millis(250));

        let mut lines = BufReader::new(theirs);
        let mut line = String::new();
        lines.read_line(&mut line).await.unwrap();
        assert_eq!(line, "STREAM=START\n");
        for _ in 0..3 {
            line.clear();
            lines.read_line(&mut line).await.unwrap();
            assert!(line.starts_with("DATA="), "unexpected line: {}", line);
            assert_eq!(line.trim_end().split(',').count(), 10);
        }

        // worker already marked the session idle; stop has nothing to stop
        match session.stop().await {
            Err(BridgeError::NoActiveStream) => {}
            other => panic!("expected NoActiveStream, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn stop_cancels_a_long_replay() {
        let source = write_source(500);
        let (session, _theirs) = manager(source.path().to_path_buf());

        session.start(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let summary = session.stop().await.unwrap();
        assert!(summary.records_sent >= 1);
        assert!(summary.records_sent < 500);
        assert!(!session.status().active);
    }

    #[tokio::test]
    async fn missing_source_aborts_the_worker() {
        let (session, theirs) = manager(PathBuf::from("/nonexistent/replay.csv"));

        session.start(10).await.unwrap();
        wait_until_idle(&session).await;
        assert_eq!(session.status().records_sent, 0);

        // only the session framing command went out, no DATA rows
        let mut lines = BufReader::new(theirs);
        let mut line = String::new();
        lines.read_line(&mut line).await.unwrap();
        assert_eq!(line, "STREAM=START\n");
    }

    #[tokio::test]
    async fn tail_clamps_the_requested_count() {
        let source = write_source(1);
        let (session, _theirs) = manager(source.path().to_path_buf());
        // empty buffer: clamped count still yields an empty, valid result
        assert!(session.tail(0).is_empty());
        assert!(session.tail(5_000).is_empty());
    }
}
