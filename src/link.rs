// Device link: owns the serial connection and its read loop
//
// One background task reads newline-delimited frames for the lifetime of the
// link and dispatches them: results are stamped with a receipt time and
// appended to the result buffer, snapshots overwrite a single-slot
// latest-value cell, anything else is dropped.
//
// Open failure is non-fatal: the link degrades to a disconnected mode where
// sends are silent no-ops and no frames ever arrive. Device loss never
// crashes the controller.

use crate::buffer::ResultBuffer;
use crate::protocol::{Command, Frame, ResultRecord, SnapshotFrame};
use crate::types::{BridgeError, BridgeResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

/// How long a snapshot read waits for a fresh value before reporting "no data"
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(2);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct DeviceLink {
    // None in disconnected mode or after close()
    writer: Mutex<Option<BoxedWriter>>,
    snapshot_rx: Mutex<watch::Receiver<Option<SnapshotFrame>>>,
    connected: AtomicBool,
    cancel: CancellationToken,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceLink {
    /// Open the serial port and start the read loop.
    ///
    /// A port that cannot be opened yields a disconnected link rather than an
    /// error; callers check `is_connected` before assuming frames will flow.
    pub fn open(port: &str, baud_rate: u32, buffer: Arc<ResultBuffer>) -> Self {
        match Self::try_open(port, baud_rate, buffer) {
            Ok(link) => {
                log::info!("Opened serial port {} at {} baud", port, baud_rate);
                link
            }
            Err(e) => {
                log::warn!("{}; running disconnected, sends will be dropped", e);
                Self::disconnected()
            }
        }
    }

    fn try_open(port: &str, baud_rate: u32, buffer: Arc<ResultBuffer>) -> BridgeResult<Self> {
        let stream = tokio_serial::new(port, baud_rate)
            .open_native_async()
            .map_err(|e| BridgeError::Serial(format!("Failed to open port {}: {}", port, e)))?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Self::connect(Box::new(reader), Box::new(writer), buffer))
    }

    /// Build a link over an arbitrary transport. Used by tests with an
    /// in-memory duplex stream standing in for the serial port.
    pub fn from_transport<T>(transport: T, buffer: Arc<ResultBuffer>) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        Self::connect(Box::new(reader), Box::new(writer), buffer)
    }

    fn connect(reader: BoxedReader, writer: BoxedWriter, buffer: Arc<ResultBuffer>) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let read_task = tokio::spawn(read_loop(reader, buffer, snapshot_tx, cancel.clone()));

        Self {
            writer: Mutex::new(Some(writer)),
            snapshot_rx: Mutex::new(snapshot_rx),
            connected: AtomicBool::new(true),
            cancel,
            read_task: Mutex::new(Some(read_task)),
        }
    }

    fn disconnected() -> Self {
        // Sender dropped immediately: the slot never fills
        let (_, snapshot_rx) = watch::channel(None);
        Self {
            writer: Mutex::new(None),
            snapshot_rx: Mutex::new(snapshot_rx),
            connected: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            read_task: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Write a command line to the device, fire-and-forget.
    /// Silent no-op when disconnected; write failures are logged, not surfaced.
    pub async fn send_command(&self, command: Command) {
        let encoded = command.encode();
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.write_all(encoded.as_bytes()).await {
            log::warn!("Failed to write command to device: {}", e);
            return;
        }
        if let Err(e) = writer.flush().await {
            log::warn!("Failed to flush command to device: {}", e);
        }
    }

    pub async fn led_on(&self) {
        self.send_command(Command::LedOn).await;
    }

    pub async fn led_off(&self) {
        self.send_command(Command::LedOff).await;
    }

    pub async fn rgb(&self, r: i32, g: i32, b: i32) {
        self.send_command(Command::rgb(r, g, b)).await;
    }

    /// Most recent ambient snapshot: a pending unread value is returned
    /// immediately, otherwise this blocks up to `SNAPSHOT_TIMEOUT` for a
    /// fresh one. `None` means no data, not an error.
    pub async fn latest_snapshot(&self) -> Option<SnapshotFrame> {
        if !self.is_connected() {
            return None;
        }

        let mut rx = self.snapshot_rx.lock().await;
        if rx.has_changed().unwrap_or(false) {
            return rx.borrow_and_update().clone();
        }
        match tokio::time::timeout(SNAPSHOT_TIMEOUT, rx.changed()).await {
            Ok(Ok(())) => rx.borrow_and_update().clone(),
            // timeout, or the read loop has exited
            _ => None,
        }
    }

    /// Stop the read loop and release the connection. Idempotent, safe to
    /// call from any task.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.cancel.cancel();
        if let Some(task) = self.read_task.lock().await.take() {
            let _ = task.await;
        }
        *self.writer.lock().await = None;
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        // Read loop must not outlive its owner
        self.cancel.cancel();
    }
}

async fn read_loop(
    reader: BoxedReader,
    buffer: Arc<ResultBuffer>,
    snapshot_tx: watch::Sender<Option<SnapshotFrame>>,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                log::info!("Device read loop cancelled");
                break;
            }

            read = reader.read_line(&mut line) => match read {
                Ok(0) => {
                    log::warn!("Device connection closed");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match Frame::decode(trimmed) {
                        Frame::Result(frame) => {
                            log::debug!(
                                "Received result #{}: RSRP={}, SINR={}, anomaly={}",
                                frame.record_num,
                                frame.rsrp,
                                frame.sinr,
                                frame.is_anomaly
                            );
                            buffer.append(ResultRecord::new(frame));
                        }
                        Frame::Snapshot(snapshot) => {
                            // Overwrite-if-unread: an unread previous value is gone
                            snapshot_tx.send_replace(Some(snapshot));
                        }
                        Frame::Unrecognized => {
                            log::debug!("Dropped unrecognized line: {}", trimmed);
                        }
                    }
                }
                Err(e) => {
                    log::error!("Serial read error: {}", e);
                    break;
                }
            }
        }
    }
}
