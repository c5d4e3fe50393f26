use std::{sync::Arc, time::Duration};

use anyhow::Result;
use log::{info, warn};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    db::Database,
    models::ErrorKind,
    sampling::provider::PositionProvider,
    status::StatusBroadcaster,
};

/// Everything the capture loop needs; owned per tracking session.
#[derive(Clone)]
pub(crate) struct CaptureContext {
    pub session_id: String,
    pub provider: Arc<dyn PositionProvider>,
    pub db: Database,
    pub broadcaster: StatusBroadcaster,
    pub interval: Duration,
    pub timeout: Duration,
    pub queue_capacity: u64,
}

pub(crate) async fn capture_loop(ctx: CaptureContext, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match tokio::time::timeout(ctx.timeout, perform_capture(&ctx)).await {
                    Ok(Ok(())) => {}
                    // perform_capture has already recorded the error under
                    // the right kind.
                    Ok(Err(err)) => {
                        warn!("capture failed for session {}: {err:?}", ctx.session_id);
                    }
                    Err(_) => {
                        let message = format!(
                            "position fix timed out after {}s",
                            ctx.timeout.as_secs()
                        );
                        warn!("{message} (session {})", ctx.session_id);
                        ctx.broadcaster.record_error(ErrorKind::Capture, message);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("capture loop shutting down for session {}", ctx.session_id);
                break;
            }
        }
    }
}

pub(crate) async fn perform_capture(ctx: &CaptureContext) -> Result<()> {
    let fix = match ctx.provider.current_fix().await {
        Ok(fix) => fix,
        Err(err) => {
            ctx.broadcaster
                .record_error(ErrorKind::Capture, format!("{err:#}"));
            return Err(err.context("position fix unavailable"));
        }
    };

    let outcome = match ctx
        .db
        .enqueue_sample(&ctx.session_id, &fix, ctx.queue_capacity)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            ctx.broadcaster
                .record_error(ErrorKind::Storage, format!("{err:#}"));
            return Err(err.context("failed to persist sample"));
        }
    };

    if let Some(sequence) = outcome.evicted {
        warn!(
            "queue at capacity for session {}; evicted sample {sequence}",
            ctx.session_id
        );
    }

    ctx.broadcaster
        .record_capture(outcome.pending, fix.battery_level, outcome.evicted);

    Ok(())
}
