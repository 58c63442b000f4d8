// Line protocol codec for the device serial link
//
// Frames received from the device are single JSON lines. A line carrying
// `"type": "PROCESSED"` is a per-record processing result and must parse in
// full; any other JSON object is a best-effort ambient sensor snapshot.
// Everything else is unrecognized and gets dropped by the dispatcher.
//
// Commands sent to the device are single ASCII lines, newline-terminated.
// Decoding never returns an error: a malformed line is simply `Unrecognized`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator value marking a result frame
pub const RESULT_FRAME_TYPE: &str = "PROCESSED";

/// Three-axis IMU reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// RGBC color reading from the APDS9960
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorReading {
    pub r: u32,
    pub g: u32,
    pub b: u32,
    pub c: u32,
}

/// Ambient sensor snapshot, every field independently optional
///
/// Field names mirror the device firmware's JSON keys (sensor part numbers).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFrame {
    pub hs3003_t_c: Option<f64>,
    pub hs3003_h_rh: Option<f64>,
    pub lps22hb_p_kpa: Option<f64>,
    pub lps22hb_t_c: Option<f64>,
    pub apds_prox: Option<i64>,
    pub apds_color: Option<ColorReading>,
    pub apds_gesture: Option<i64>,
    pub acc_g: Option<Vec3>,
    pub gyro_dps: Option<Vec3>,
    #[serde(rename = "mag_uT")]
    pub mag_ut: Option<Vec3>,
}

/// Per-record processing result computed by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFrame {
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub pci: u32,
    pub cell_id: u64,
    pub rsrp: i32,
    pub rsrq: i32,
    pub rssi: i32,
    pub sinr: i32,
    pub is_anomaly: bool,
    /// Monotonically increasing sequence number assigned by the device
    pub record_num: u64,
    /// True when the device derived RSSI instead of passing the source value through
    #[serde(default)]
    pub rssi_is_calculated: bool,
}

/// A result frame plus the wall-clock time the link received it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub frame: ResultFrame,
}

impl ResultRecord {
    pub fn new(frame: ResultFrame) -> Self {
        Self {
            received_at: Utc::now(),
            frame,
        }
    }
}

/// One row of the replay source, as sent to the device in a `DATA=` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub pci: u32,
    pub cell_id: u64,
    pub rsrp: i32,
    pub rsrq: i32,
    pub rssi: i32,
    pub sinr: i32,
}

/// Decoded shape of one line received from the device
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Result(ResultFrame),
    Snapshot(SnapshotFrame),
    Unrecognized,
}

impl Frame {
    /// Decode a raw line. Never fails; anything that matches neither shape
    /// is `Unrecognized`.
    ///
    /// A line tagged `PROCESSED` that is missing a required field does not
    /// fall back to the snapshot shape: the device clearly meant it as a
    /// result, so a partial one is dropped rather than misfiled.
    pub fn decode(line: &str) -> Frame {
        let value: serde_json::Value = match serde_json::from_str(line.trim()) {
            Ok(v) => v,
            Err(_) => return Frame::Unrecognized,
        };

        if !value.is_object() {
            return Frame::Unrecognized;
        }

        if value.get("type").and_then(|t| t.as_str()) == Some(RESULT_FRAME_TYPE) {
            return match serde_json::from_value::<ResultFrame>(value) {
                Ok(frame) => Frame::Result(frame),
                Err(_) => Frame::Unrecognized,
            };
        }

        match serde_json::from_value::<SnapshotFrame>(value) {
            Ok(frame) => Frame::Snapshot(frame),
            Err(_) => Frame::Unrecognized,
        }
    }
}

/// Command sent to the device over the serial line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LedOn,
    LedOff,
    Rgb { r: u8, g: u8, b: u8 },
    StreamStart,
    StreamStop,
    Data(SourceRecord),
}

impl Command {
    /// Build an RGB command with each channel clamped to 0-255
    pub fn rgb(r: i32, g: i32, b: i32) -> Command {
        Command::Rgb {
            r: r.clamp(0, 255) as u8,
            g: g.clamp(0, 255) as u8,
            b: b.clamp(0, 255) as u8,
        }
    }

    /// Encode as a single newline-terminated line. Never fails.
    pub fn encode(&self) -> String {
        let body = match self {
            Command::LedOn => "LED=ON".to_string(),
            Command::LedOff => "LED=OFF".to_string(),
            Command::Rgb { r, g, b } => format!("RGB={},{},{}", r, g, b),
            Command::StreamStart => "STREAM=START".to_string(),
            Command::StreamStop => "STREAM=STOP".to_string(),
            Command::Data(rec) => format!(
                "DATA={},{},{},{},{},{},{},{},{},{}",
                rec.timestamp,
                rec.latitude,
                rec.longitude,
                rec.elevation,
                rec.pci,
                rec.cell_id,
                rec.rsrp,
                rec.rsrq,
                rec.rssi,
                rec.sinr
            ),
        };
        format!("{}\n", body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_snapshot_with_partial_fields() {
        let frame = Frame::decode(r#"{"hs3003_t_c":21.5,"apds_prox":3}"#);
        match frame {
            Frame::Snapshot(s) => {
                assert_eq!(s.hs3003_t_c, Some(21.5));
                assert_eq!(s.apds_prox, Some(3));
                assert_eq!(s.hs3003_h_rh, None);
                assert_eq!(s.acc_g, None);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn decode_unknown_keys_as_empty_snapshot() {
        // No `type` field, no known keys: still a snapshot, just an empty one
        let frame = Frame::decode(r#"{"temp":21.5}"#);
        assert_eq!(frame, Frame::Snapshot(SnapshotFrame::default()));
    }

    #[test]
    fn decode_snapshot_with_nested_readings() {
        let frame = Frame::decode(
            r#"{"acc_g":{"x":0.01,"y":-0.02,"z":0.98},"apds_color":{"r":12,"g":34,"b":56,"c":78}}"#,
        );
        match frame {
            Frame::Snapshot(s) => {
                assert_eq!(s.acc_g, Some(Vec3 { x: 0.01, y: -0.02, z: 0.98 }));
                assert_eq!(
                    s.apds_color,
                    Some(ColorReading { r: 12, g: 34, b: 56, c: 78 })
                );
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn decode_processed_result() {
        let line = r#"{"type":"PROCESSED","timestamp":100,"latitude":47.8,"longitude":13.0,
            "elevation":420.5,"pci":101,"cell_id":3456,"rsrp":-85,"rsrq":-10,"rssi":-60,
            "sinr":12,"is_anomaly":false,"record_num":7}"#;
        match Frame::decode(line) {
            Frame::Result(r) => {
                assert_eq!(r.timestamp, 100);
                assert_eq!(r.pci, 101);
                assert_eq!(r.rsrp, -85);
                assert_eq!(r.record_num, 7);
                assert!(!r.is_anomaly);
                // optional flag defaults false when absent
                assert!(!r.rssi_is_calculated);
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn decode_processed_missing_field_is_unrecognized() {
        // `sinr` missing: must not fall back to the snapshot shape
        let line = r#"{"type":"PROCESSED","timestamp":100,"latitude":47.8,"longitude":13.0,
            "elevation":420.5,"pci":101,"cell_id":3456,"rsrp":-85,"rsrq":-10,"rssi":-60,
            "is_anomaly":false,"record_num":7}"#;
        assert_eq!(Frame::decode(line), Frame::Unrecognized);
    }

    #[test]
    fn decode_non_json_is_unrecognized() {
        assert_eq!(Frame::decode("boot: sensors ok"), Frame::Unrecognized);
        assert_eq!(Frame::decode(""), Frame::Unrecognized);
        assert_eq!(Frame::decode("[1,2,3]"), Frame::Unrecognized);
    }

    #[test]
    fn encode_simple_commands() {
        assert_eq!(Command::LedOn.encode(), "LED=ON\n");
        assert_eq!(Command::LedOff.encode(), "LED=OFF\n");
        assert_eq!(Command::StreamStart.encode(), "STREAM=START\n");
        assert_eq!(Command::StreamStop.encode(), "STREAM=STOP\n");
    }

    #[test]
    fn encode_rgb_clamps_channels() {
        assert_eq!(Command::rgb(-5, 300, 128).encode(), "RGB=0,255,128\n");
        assert_eq!(Command::rgb(255, 255, 0).encode(), "RGB=255,255,0\n");
    }

    #[test]
    fn encode_data_command_field_order() {
        let rec = SourceRecord {
            timestamp: 1385631393,
            latitude: 47.81,
            longitude: 13.04,
            elevation: 420.5,
            pci: 101,
            cell_id: 3456,
            rsrp: -85,
            rsrq: -10,
            rssi: -60,
            sinr: 12,
        };
        assert_eq!(
            Command::Data(rec).encode(),
            "DATA=1385631393,47.81,13.04,420.5,101,3456,-85,-10,-60,12\n"
        );
    }
}
