use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw position observation as reported by the positioning capability.
///
/// `captured_at` is stamped by the provider at fix time, so a delayed
/// enqueue does not distort the recorded time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    /// Device power level at capture time, 0-100.
    pub battery_level: Option<u8>,
    pub captured_at: DateTime<Utc>,
}

/// A fix stamped with delivery identity at enqueue time.
///
/// Immutable once enqueued; whether a sample is still pending lives in the
/// queue, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Strictly increasing, assigned by the queue, never reused across
    /// restarts.
    pub sequence: u64,
    pub session_id: String,
    pub fix: PositionFix,
}
