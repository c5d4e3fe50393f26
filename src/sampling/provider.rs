use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use crate::models::PositionFix;

/// The positioning capability the agent samples from.
///
/// An error return means no fix was available this tick (no signal,
/// permission revoked); the capture loop records it and retries on the next
/// interval rather than stopping the session.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    async fn current_fix(&self) -> Result<PositionFix>;
}

/// Random-walk provider for the demo binary and local experiments.
pub struct SimulatedProvider {
    state: Mutex<WalkState>,
}

struct WalkState {
    latitude: f64,
    longitude: f64,
    heading_deg: f64,
    battery: f64,
}

impl SimulatedProvider {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            state: Mutex::new(WalkState {
                latitude,
                longitude,
                heading_deg: 90.0,
                battery: 100.0,
            }),
        }
    }
}

#[async_trait]
impl PositionProvider for SimulatedProvider {
    async fn current_fix(&self) -> Result<PositionFix> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut rng = rand::thread_rng();

        state.heading_deg =
            (state.heading_deg + rng.gen_range(-15.0..15.0)).rem_euclid(360.0);
        let step = 0.0003;
        let heading_rad = state.heading_deg.to_radians();
        state.latitude += step * heading_rad.cos();
        state.longitude += step * heading_rad.sin();
        state.battery = (state.battery - 0.05).max(0.0);

        Ok(PositionFix {
            latitude: state.latitude,
            longitude: state.longitude,
            accuracy_m: Some(rng.gen_range(3.0..12.0)),
            speed_mps: Some(rng.gen_range(8.0..16.0)),
            heading_deg: Some(state.heading_deg),
            battery_level: Some(state.battery.round() as u8),
            captured_at: Utc::now(),
        })
    }
}
