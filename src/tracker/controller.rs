use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::info;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    config::AgentConfig,
    db::Database,
    models::{SessionIdentity, TrackingSession},
    sampling::{loop_worker::CaptureContext, provider::PositionProvider, SamplingController},
    status::StatusBroadcaster,
};

/// Owns the session state machine: `Stopped <-> Active`.
///
/// All start/stop requests serialize on the session lock, so concurrent
/// callers cannot race two sessions into existence. Starting over an active
/// session with the same identity is a no-op; a different identity ends the
/// old session and begins a new one (a session boundary, logged as such).
#[derive(Clone)]
pub struct TrackerController {
    session: Arc<Mutex<Option<TrackingSession>>>,
    sampling: Arc<Mutex<SamplingController>>,
    db: Database,
    broadcaster: StatusBroadcaster,
    provider: Arc<dyn PositionProvider>,
    config: AgentConfig,
}

impl TrackerController {
    pub(crate) fn new(
        db: Database,
        broadcaster: StatusBroadcaster,
        provider: Arc<dyn PositionProvider>,
        config: AgentConfig,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(None)),
            sampling: Arc::new(Mutex::new(SamplingController::new())),
            db,
            broadcaster,
            provider,
            config,
        }
    }

    pub async fn start_tracking(
        &self,
        driver_id: &str,
        vehicle_id: Option<&str>,
    ) -> Result<TrackingSession> {
        let identity = SessionIdentity {
            driver_id: driver_id.to_string(),
            vehicle_id: vehicle_id.map(|v| v.to_string()),
        };

        let mut session = self.session.lock().await;

        if let Some(active) = session.as_ref() {
            if active.identity() == identity {
                info!(
                    "start_tracking no-op; session {} already active for this identity",
                    active.id
                );
                return Ok(active.clone());
            }
        }

        if let Some(previous) = session.take() {
            info!(
                "session boundary: ending session {} before starting one for driver {}",
                previous.id, identity.driver_id
            );
            if let Err(err) = self.end_session(previous).await {
                self.broadcaster.set_tracking(false);
                return Err(err);
            }
        }

        let new_session = TrackingSession {
            id: Uuid::new_v4().to_string(),
            driver_id: identity.driver_id,
            vehicle_id: identity.vehicle_id,
            started_at: Utc::now(),
            ended_at: None,
        };

        self.db.insert_session(&new_session).await?;

        self.sampling.lock().await.start(CaptureContext {
            session_id: new_session.id.clone(),
            provider: self.provider.clone(),
            db: self.db.clone(),
            broadcaster: self.broadcaster.clone(),
            interval: self.config.capture_interval(),
            timeout: self.config.capture_timeout(),
            queue_capacity: self.config.queue_capacity,
        })?;

        *session = Some(new_session.clone());
        self.broadcaster.set_tracking(true);
        info!(
            "tracking started: session {} driver {} vehicle {:?}",
            new_session.id, new_session.driver_id, new_session.vehicle_id
        );

        Ok(new_session)
    }

    /// Stops capturing immediately. Pending samples stay queued and keep
    /// draining through the sync engine.
    pub async fn stop_tracking(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            return Ok(());
        };

        let result = self.end_session(active).await;
        self.broadcaster.set_tracking(false);
        result
    }

    pub async fn current_session(&self) -> Option<TrackingSession> {
        self.session.lock().await.clone()
    }

    // Cancels sampling first so no further fixes are captured, then
    // persists the boundary.
    async fn end_session(&self, session: TrackingSession) -> Result<()> {
        self.sampling.lock().await.stop().await?;
        self.db.mark_session_ended(&session.id, Utc::now()).await?;
        info!("tracking stopped: session {}", session.id);
        Ok(())
    }
}
