// Bounded result store and query surface
//
// Results arrive asynchronously from the device read loop while callers query
// concurrently, so everything lives behind one coarse mutex. Appends and
// length-check eviction are O(1), filters are O(n) scans; with the 10k bound
// that is perfectly acceptable.

use crate::protocol::ResultRecord;
use crate::types::{RssiOriginStats, SignalStats};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Default retention bound, matching the device-side session length
pub const DEFAULT_CAPACITY: usize = 10_000;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Thread-safe FIFO store of processed records with bounded retention
///
/// Insertion order is arrival order; on overflow the oldest record is evicted.
/// Records are never mutated after append.
pub struct ResultBuffer {
    records: Mutex<VecDeque<ResultRecord>>,
    capacity: usize,
}

impl ResultBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity,
        }
    }

    /// Append a record, evicting the oldest when over capacity.
    /// Eviction and push happen under the same lock acquisition.
    pub fn append(&self, record: ResultRecord) {
        let mut records = self.records.lock();
        records.push_back(record);
        if records.len() > self.capacity {
            records.pop_front();
            log::debug!("Result buffer full, oldest record evicted");
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Last `n` records in arrival order, or all of them if fewer exist
    pub fn tail(&self, n: usize) -> Vec<ResultRecord> {
        let records = self.records.lock();
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    /// Records meeting both quality thresholds, arrival order preserved.
    /// An empty result means nothing matched, not an error.
    pub fn filter_by_quality(&self, min_rsrp: i32, min_sinr: i32) -> Vec<ResultRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.frame.rsrp >= min_rsrp && r.frame.sinr >= min_sinr)
            .cloned()
            .collect()
    }

    /// All records the device flagged as anomalies, arrival order preserved
    pub fn anomalies(&self) -> Vec<ResultRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.frame.is_anomaly)
            .cloned()
            .collect()
    }

    /// Aggregate statistics over the buffered records, `None` when empty
    pub fn stats(&self) -> Option<SignalStats> {
        let records = self.records.lock();
        if records.is_empty() {
            return None;
        }

        let total = records.len();
        let mut sum_rsrp = 0i64;
        let mut sum_rsrq = 0i64;
        let mut sum_rssi = 0i64;
        let mut sum_sinr = 0i64;
        let mut min_rsrp = i32::MAX;
        let mut max_rsrp = i32::MIN;
        let mut min_sinr = i32::MAX;
        let mut max_sinr = i32::MIN;
        let mut anomaly_count = 0usize;

        for r in records.iter() {
            sum_rsrp += r.frame.rsrp as i64;
            sum_rsrq += r.frame.rsrq as i64;
            sum_rssi += r.frame.rssi as i64;
            sum_sinr += r.frame.sinr as i64;
            min_rsrp = min_rsrp.min(r.frame.rsrp);
            max_rsrp = max_rsrp.max(r.frame.rsrp);
            min_sinr = min_sinr.min(r.frame.sinr);
            max_sinr = max_sinr.max(r.frame.sinr);
            if r.frame.is_anomaly {
                anomaly_count += 1;
            }
        }

        Some(SignalStats {
            total_records: total,
            avg_rsrp: round2(sum_rsrp as f64 / total as f64),
            avg_rsrq: round2(sum_rsrq as f64 / total as f64),
            avg_rssi: round2(sum_rssi as f64 / total as f64),
            avg_sinr: round2(sum_sinr as f64 / total as f64),
            min_rsrp,
            max_rsrp,
            min_sinr,
            max_sinr,
            anomaly_count,
            anomaly_rate: round4(anomaly_count as f64 / total as f64),
        })
    }

    /// Split of device-calculated vs. source-measured RSSI, `None` when empty
    pub fn rssi_origin_stats(&self) -> Option<RssiOriginStats> {
        let records = self.records.lock();
        if records.is_empty() {
            return None;
        }

        let total = records.len();
        let (mut calc_count, mut calc_sum) = (0usize, 0i64);
        let (mut meas_count, mut meas_sum) = (0usize, 0i64);
        for r in records.iter() {
            if r.frame.rssi_is_calculated {
                calc_count += 1;
                calc_sum += r.frame.rssi as i64;
            } else {
                meas_count += 1;
                meas_sum += r.frame.rssi as i64;
            }
        }

        let avg = |sum: i64, count: usize| {
            (count > 0).then(|| round2(sum as f64 / count as f64))
        };

        Some(RssiOriginStats {
            total_records: total,
            measured_count: meas_count,
            calculated_count: calc_count,
            calculated_percentage: round2(calc_count as f64 / total as f64 * 100.0),
            measured_rssi_avg: avg(meas_sum, meas_count),
            calculated_rssi_avg: avg(calc_sum, calc_count),
        })
    }

    /// Drop all buffered records
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Default for ResultBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
