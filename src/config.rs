use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the tracking agent.
///
/// Capture cadence, sync cadence, batch size, backoff constants and the
/// queue cap are configuration rather than hard-coded policy; the defaults
/// below are the baseline contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Seconds between position fixes while tracking.
    pub capture_interval_secs: u64,
    /// A single fix attempt is abandoned after this many seconds.
    pub capture_timeout_secs: u64,
    /// Seconds between periodic sync attempts.
    pub sync_interval_secs: u64,
    /// Maximum samples per upload batch.
    pub batch_size: usize,
    /// Upload request timeout in seconds.
    pub upload_timeout_secs: u64,
    /// First-failure backoff delay in milliseconds; doubles per consecutive
    /// failure.
    pub backoff_base_ms: u64,
    /// Ceiling for the backoff delay in milliseconds.
    pub backoff_cap_ms: u64,
    /// Pending samples beyond this count evict the oldest sample first.
    pub queue_capacity: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            capture_interval_secs: 30,
            capture_timeout_secs: 10,
            sync_interval_secs: 15,
            batch_size: 100,
            upload_timeout_secs: 30,
            backoff_base_ms: 2_000,
            backoff_cap_ms: 300_000,
            queue_capacity: 10_000,
        }
    }
}

impl AgentConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.capture_interval_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}
