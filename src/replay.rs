// Rate-limited replay of recorded signal measurements
//
// Reads the CSV source in file order and sends one `DATA=` command per row
// through the device link, sleeping 1/rate seconds between sends. The worker
// is cancelled cooperatively: the signal is checked before each send, so a
// stop request may still let one in-flight record go out.

use crate::link::DeviceLink;
use crate::protocol::{Command, SourceRecord};
use crate::session::SessionShared;
use crate::types::{BridgeError, BridgeResult};
use chrono::{LocalResult, NaiveDateTime};
use csv::StringRecord;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Timestamp format of the replay source's `Time` column (local time)
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a source timestamp to unix seconds; unparseable values become 0
pub fn parse_timestamp(raw: &str) -> i64 {
    match NaiveDateTime::parse_from_str(raw.trim(), TIME_FORMAT) {
        Ok(naive) => match naive.and_local_timezone(chrono::Local) {
            LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.timestamp(),
            LocalResult::None => {
                log::warn!("Timestamp '{}' does not exist in the local timezone", raw);
                0
            }
        },
        Err(e) => {
            log::warn!("Failed to parse timestamp '{}': {}", raw, e);
            0
        }
    }
}

/// Build a `SourceRecord` from one CSV row.
///
/// Numeric fields default to zero when absent or unparseable rather than
/// aborting the row; `None` only when the source lacks the column entirely.
pub fn parse_source_record(headers: &StringRecord, row: &StringRecord) -> Option<SourceRecord> {
    let field = |name: &str| -> Option<&str> {
        headers
            .iter()
            .position(|h| h == name)
            .and_then(|i| row.get(i))
    };
    let numeric = |name: &str| -> Option<f64> {
        field(name).map(|s| s.trim().parse::<f64>().unwrap_or(0.0))
    };

    Some(SourceRecord {
        timestamp: parse_timestamp(field("Time")?),
        latitude: numeric("Latitude")?,
        longitude: numeric("Longitude")?,
        elevation: numeric("Elevation")?,
        pci: numeric("PCI")? as u32,
        cell_id: numeric("Cell_Id")? as u64,
        rsrp: numeric("RSRP")? as i32,
        rsrq: numeric("RSRQ")? as i32,
        rssi: numeric("RSSI")? as i32,
        sinr: numeric("SINR")? as i32,
    })
}

/// Stream the source file to the device at `rate` records per second.
///
/// A missing source aborts the worker without sending anything; a malformed
/// row is skipped. On exit, normal or cancelled, the session is marked idle.
pub(crate) async fn run_replay(
    link: Arc<DeviceLink>,
    path: PathBuf,
    rate: u32,
    cancel: CancellationToken,
    shared: Arc<SessionShared>,
) {
    if let Err(e) = stream_rows(link, path, rate, cancel, &shared).await {
        log::error!("Replay worker error: {}", e);
    }
    shared.mark_idle();
}

async fn stream_rows(
    link: Arc<DeviceLink>,
    path: PathBuf,
    rate: u32,
    cancel: CancellationToken,
    shared: &SessionShared,
) -> BridgeResult<()> {
    if !path.exists() {
        return Err(BridgeError::SourceMissing(path));
    }

    let mut reader = csv::Reader::from_path(&path)
        .map_err(|e| BridgeError::Parse(format!("Failed to open replay source: {}", e)))?;
    let headers = reader
        .headers()
        .map_err(|e| BridgeError::Parse(format!("Failed to read source headers: {}", e)))?
        .clone();

    let delay = Duration::from_secs_f64(1.0 / rate as f64);

    for row in reader.records() {
        if cancel.is_cancelled() {
            log::info!(
                "Replay cancelled after {} records",
                shared.records_sent.load(Ordering::Relaxed)
            );
            break;
        }

        let row = match row {
            Ok(row) => row,
            Err(e) => {
                log::warn!("Skipping malformed source row: {}", e);
                continue;
            }
        };
        let Some(record) = parse_source_record(&headers, &row) else {
            log::warn!("Skipping source row with missing columns");
            continue;
        };

        link.send_command(Command::Data(record)).await;
        shared.records_sent.fetch_add(1, Ordering::Relaxed);

        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!(
                    "Replay cancelled after {} records",
                    shared.records_sent.load(Ordering::Relaxed)
                );
                break;
            }
            _ = sleep(delay) => {}
        }
    }

    log::info!(
        "Finished streaming {} records",
        shared.records_sent.load(Ordering::Relaxed)
    );
    Ok(())
}
