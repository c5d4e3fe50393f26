pub mod controller;

pub use controller::TrackerController;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::Utc;
use log::warn;
use tokio::sync::Mutex;

use crate::{
    config::AgentConfig,
    db::Database,
    models::{StatusSnapshot, TrackingSession},
    sampling::provider::PositionProvider,
    status::{StatusBroadcaster, Subscription},
    sync::{engine::SyncContext, LocationSink, SyncController, SyncTrigger},
};

/// The tracking agent: one owned instance per process, wired to a position
/// provider and a location sink, passed by reference to its consumers.
///
/// Construction recovers from a previous crash (stale open sessions are
/// closed, leftover pending samples stay queued) and starts the background
/// sync engine; `start_tracking`/`stop_tracking` drive the capture side.
pub struct LocationAgent {
    db: Database,
    broadcaster: StatusBroadcaster,
    tracker: TrackerController,
    sync: Mutex<SyncController>,
    sync_trigger: SyncTrigger,
}

impl LocationAgent {
    pub async fn new(
        config: AgentConfig,
        db_path: PathBuf,
        provider: Arc<dyn PositionProvider>,
        sink: Arc<dyn LocationSink>,
    ) -> Result<Self> {
        let db = Database::new(db_path)?;

        let recovered = db.close_open_sessions(Utc::now()).await?;
        if recovered > 0 {
            warn!("recovered {recovered} session(s) left open by a previous run");
        }

        let broadcaster = StatusBroadcaster::new();
        let pending = db.pending_count().await?;
        broadcaster.set_queue_size(pending);

        let tracker = TrackerController::new(
            db.clone(),
            broadcaster.clone(),
            provider,
            config.clone(),
        );

        let mut sync = SyncController::new();
        let sync_trigger = sync.start(SyncContext {
            db: db.clone(),
            sink,
            broadcaster: broadcaster.clone(),
            sync_interval: config.sync_interval(),
            batch_size: config.batch_size,
            backoff_base: config.backoff_base(),
            backoff_cap: config.backoff_cap(),
        })?;

        Ok(Self {
            db,
            broadcaster,
            tracker,
            sync: Mutex::new(sync),
            sync_trigger,
        })
    }

    pub async fn start_tracking(
        &self,
        driver_id: &str,
        vehicle_id: Option<&str>,
    ) -> Result<TrackingSession> {
        self.tracker.start_tracking(driver_id, vehicle_id).await
    }

    pub async fn stop_tracking(&self) -> Result<()> {
        self.tracker.stop_tracking().await
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.broadcaster.snapshot()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StatusSnapshot) + Send + Sync + 'static,
    {
        self.broadcaster.subscribe(callback)
    }

    /// Opportunistic sync: call when the platform reports connectivity is
    /// back instead of waiting for the next periodic attempt.
    pub fn notify_connectivity_restored(&self) {
        self.sync_trigger.fire();
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Stops capturing and sync. Pending samples stay on disk for the next
    /// run; an in-flight upload attempt finishes under its own timeout.
    pub async fn shutdown(&self) -> Result<()> {
        self.tracker.stop_tracking().await?;
        self.sync.lock().await.stop().await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;

    use super::LocationAgent;
    use crate::{
        config::AgentConfig,
        models::{PositionFix, Sample},
        sampling::provider::PositionProvider,
        sync::LocationSink,
    };

    struct NoSignalProvider;

    #[async_trait]
    impl PositionProvider for NoSignalProvider {
        async fn current_fix(&self) -> Result<PositionFix> {
            bail!("no GPS signal");
        }
    }

    struct CountingSink {
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl LocationSink for CountingSink {
        async fn upload_batch(&self, _session_id: &str, _samples: &[Sample]) -> Result<()> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // Keeps the backlog on disk no matter when the engine's startup pass
    // runs relative to the test body.
    struct RefusingSink;

    #[async_trait]
    impl LocationSink for RefusingSink {
        async fn upload_batch(&self, _session_id: &str, _samples: &[Sample]) -> Result<()> {
            bail!("connection refused");
        }
    }

    fn fix() -> PositionFix {
        PositionFix {
            latitude: 40.71,
            longitude: -74.0,
            accuracy_m: None,
            speed_mps: None,
            heading_deg: None,
            battery_level: None,
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn pending_samples_survive_an_agent_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("waytrack.sqlite3");
        let config = AgentConfig {
            // Keep the periodic engine quiet so the backlog persists.
            sync_interval_secs: 3600,
            ..AgentConfig::default()
        };

        {
            let agent = LocationAgent::new(
                config.clone(),
                path.clone(),
                Arc::new(NoSignalProvider),
                Arc::new(RefusingSink),
            )
            .await
            .unwrap();

            let session = agent
                .start_tracking("driver-7", Some("vehicle-42"))
                .await
                .unwrap();
            for _ in 0..2 {
                agent
                    .database()
                    .enqueue_sample(&session.id, &fix(), 0)
                    .await
                    .unwrap();
            }
            // Simulated crash: no stop_tracking, no shutdown.
            agent.sync.lock().await.stop().await.unwrap();
        }

        let agent = LocationAgent::new(
            config,
            path,
            Arc::new(NoSignalProvider),
            Arc::new(RefusingSink),
        )
        .await
        .unwrap();

        let snapshot = agent.snapshot();
        assert!(!snapshot.is_tracking);
        assert_eq!(snapshot.queue_size, 2);
        assert!(agent.database().get_open_session().await.unwrap().is_none());

        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn connectivity_signal_drains_the_queue() {
        let dir = TempDir::new().unwrap();
        let config = AgentConfig {
            sync_interval_secs: 3600,
            ..AgentConfig::default()
        };

        let sink = Arc::new(CountingSink {
            uploads: AtomicUsize::new(0),
        });
        let agent = LocationAgent::new(
            config,
            dir.path().join("waytrack.sqlite3"),
            Arc::new(NoSignalProvider),
            sink.clone(),
        )
        .await
        .unwrap();

        let session = agent
            .start_tracking("driver-7", None)
            .await
            .unwrap();
        agent
            .database()
            .enqueue_sample(&session.id, &fix(), 0)
            .await
            .unwrap();

        agent.notify_connectivity_restored();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sink.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(agent.database().pending_count().await.unwrap(), 0);
        assert!(agent.snapshot().last_update.is_some());

        agent.shutdown().await.unwrap();
    }
}
