use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which operation produced `last_error`. A success of the same kind clears
/// the error; successes of other kinds leave it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Capture,
    Upload,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Capture => "capture",
            ErrorKind::Upload => "upload",
            ErrorKind::Storage => "storage",
        }
    }
}

/// The externally observable state of the agent.
///
/// `queue_size` is projected from the durable queue after every mutation,
/// never counted independently, so it cannot drift from the real pending
/// count.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub is_tracking: bool,
    pub queue_size: u64,
    pub battery_level: Option<u8>,
    /// Time of the last successful flush to the sink, not the last capture.
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
