use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The (driver, vehicle) pair a tracking session runs under.
///
/// Tracking may start before a vehicle is selected, so `vehicle_id` is
/// optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub driver_id: String,
    pub vehicle_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub id: String,
    pub driver_id: String,
    pub vehicle_id: Option<String>,
    pub started_at: DateTime<Utc>,
    /// None while the session is active.
    pub ended_at: Option<DateTime<Utc>>,
}

impl TrackingSession {
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            driver_id: self.driver_id.clone(),
            vehicle_id: self.vehicle_id.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}
