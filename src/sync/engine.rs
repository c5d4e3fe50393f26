use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{debug, info, warn};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{backoff::Backoff, sink::LocationSink};
use crate::{db::Database, models::ErrorKind, status::StatusBroadcaster};

/// Everything the sync loop needs; constructed once per agent.
#[derive(Clone)]
pub(crate) struct SyncContext {
    pub db: Database,
    pub sink: Arc<dyn LocationSink>,
    pub broadcaster: StatusBroadcaster,
    pub sync_interval: Duration,
    pub batch_size: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FlushOutcome {
    /// Nothing pending; not a flush, so `last_update` is untouched.
    Empty,
    Delivered { count: usize, up_to: u64 },
}

/// One delivery attempt: peek a batch, trim it to a single session, upload,
/// and acknowledge on success. The queue is the only commit point; a crash
/// or failure anywhere before `acknowledge_up_to` leaves every sample in
/// place for retry.
pub(crate) async fn flush_once(ctx: &SyncContext) -> Result<FlushOutcome> {
    let batch = ctx
        .db
        .peek_batch(ctx.batch_size)
        .await
        .context("failed to read pending batch")?;

    let Some(first) = batch.first() else {
        return Ok(FlushOutcome::Empty);
    };

    // A batch never mixes sessions; the remainder waits for the next pass.
    let session_id = first.session_id.clone();
    let batch: Vec<_> = batch
        .into_iter()
        .take_while(|sample| sample.session_id == session_id)
        .collect();

    ctx.sink.upload_batch(&session_id, &batch).await?;

    let up_to = batch[batch.len() - 1].sequence;
    ctx.db
        .acknowledge_up_to(up_to)
        .await
        .context("failed to acknowledge delivered batch")?;

    let pending = ctx
        .db
        .pending_count()
        .await
        .context("failed to read pending count")?;
    ctx.broadcaster.record_flush_success(pending, Utc::now());

    debug!(
        "delivered {} sample(s) up to sequence {up_to} for session {session_id}",
        batch.len()
    );

    Ok(FlushOutcome::Delivered {
        count: batch.len(),
        up_to,
    })
}

/// Runs one attempt and arms backoff on failure; returns the deadline before
/// which further triggers are ignored.
pub(crate) async fn run_attempt(ctx: &SyncContext, backoff: &mut Backoff) -> Option<Instant> {
    match flush_once(ctx).await {
        Ok(FlushOutcome::Delivered { .. }) => {
            backoff.reset();
            None
        }
        Ok(FlushOutcome::Empty) => None,
        Err(err) => {
            let delay = backoff.record_failure();
            warn!(
                "upload attempt failed ({} consecutive): {err:#}; next attempt in {:.1}s",
                backoff.failures(),
                delay.as_secs_f64()
            );
            ctx.broadcaster
                .record_error(ErrorKind::Upload, format!("{err:#}"));
            Some(Instant::now() + delay)
        }
    }
}

async fn sync_loop(
    ctx: SyncContext,
    cancel_token: CancellationToken,
    mut trigger_rx: watch::Receiver<u64>,
) {
    let mut ticker = tokio::time::interval(ctx.sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut backoff = Backoff::new(ctx.backoff_base, ctx.backoff_cap);
    let mut next_attempt_at: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = trigger_rx.changed() => {
                if changed.is_err() {
                    // Controller gone; rely on cancellation for shutdown.
                    cancel_token.cancelled().await;
                    break;
                }
            }
            _ = cancel_token.cancelled() => {
                info!("sync loop shutting down");
                break;
            }
        }

        // Triggers landing inside the backoff window are no-ops.
        if let Some(deadline) = next_attempt_at {
            if Instant::now() < deadline {
                continue;
            }
            next_attempt_at = None;
        }

        next_attempt_at = run_attempt(&ctx, &mut backoff).await;
    }
}

/// Fires an immediate sync attempt, e.g. when connectivity returns. Triggers
/// arriving while an upload is in flight coalesce into at most one follow-up
/// pass.
#[derive(Clone)]
pub struct SyncTrigger {
    tx: Arc<watch::Sender<u64>>,
}

impl SyncTrigger {
    pub fn fire(&self) {
        self.tx.send_modify(|n| *n = n.wrapping_add(1));
    }
}

/// Owns the background sync task.
pub struct SyncController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SyncController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub(crate) fn start(&mut self, ctx: SyncContext) -> Result<SyncTrigger> {
        if self.handle.is_some() {
            bail!("sync engine already active");
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let (trigger_tx, trigger_rx) = watch::channel(0u64);

        let handle = tokio::spawn(sync_loop(ctx, token_clone, trigger_rx));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(SyncTrigger {
            tx: Arc::new(trigger_tx),
        })
    }

    /// Cooperative shutdown: an in-flight upload attempt runs to completion
    /// or failure under its own timeout before the task exits.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sync loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for SyncController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;

    use super::{flush_once, run_attempt, FlushOutcome, SyncContext, SyncController};
    use crate::{
        db::Database,
        models::{PositionFix, Sample},
        sampling::loop_worker::{perform_capture, CaptureContext},
        status::StatusBroadcaster,
        sync::{backoff::Backoff, sink::LocationSink},
    };

    /// Scripted sink: pops one result per upload, records what it saw.
    /// An empty script accepts everything.
    #[derive(Default)]
    struct MockSink {
        responses: Mutex<VecDeque<Result<(), String>>>,
        uploads: Mutex<Vec<(String, Vec<u64>)>>,
    }

    impl MockSink {
        fn failing_then_ok(failures: usize) -> Self {
            let sink = Self::default();
            {
                let mut responses = sink.responses.lock().unwrap();
                for _ in 0..failures {
                    responses.push_back(Err("connection refused".to_string()));
                }
            }
            sink
        }

        fn uploads(&self) -> Vec<(String, Vec<u64>)> {
            self.uploads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LocationSink for MockSink {
        async fn upload_batch(&self, session_id: &str, samples: &[Sample]) -> Result<()> {
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()));
            if let Err(message) = response {
                bail!("{message}");
            }
            self.uploads.lock().unwrap().push((
                session_id.to_string(),
                samples.iter().map(|s| s.sequence).collect(),
            ));
            Ok(())
        }
    }

    fn fix() -> PositionFix {
        PositionFix {
            latitude: 40.71,
            longitude: -74.0,
            accuracy_m: None,
            speed_mps: None,
            heading_deg: None,
            battery_level: Some(75),
            captured_at: Utc::now(),
        }
    }

    fn context(dir: &TempDir, sink: Arc<MockSink>) -> SyncContext {
        SyncContext {
            db: Database::new(dir.path().join("waytrack.sqlite3")).unwrap(),
            sink,
            broadcaster: StatusBroadcaster::new(),
            sync_interval: Duration::from_secs(15),
            batch_size: 100,
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn empty_queue_is_a_quiet_noop() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MockSink::default());
        let ctx = context(&dir, sink.clone());

        assert_eq!(flush_once(&ctx).await.unwrap(), FlushOutcome::Empty);
        assert!(sink.uploads().is_empty());
        assert!(ctx.broadcaster.snapshot().last_update.is_none());
    }

    #[tokio::test]
    async fn success_acknowledges_exactly_the_batch() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MockSink::default());
        let ctx = context(&dir, sink.clone());

        for _ in 0..5 {
            ctx.db.enqueue_sample("s1", &fix(), 0).await.unwrap();
        }

        let ctx_small = SyncContext {
            batch_size: 3,
            ..ctx.clone()
        };
        let outcome = flush_once(&ctx_small).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Delivered { count: 3, up_to: 3 });

        // Samples 4..5 are still pending, 1..3 are gone.
        let remaining = ctx.db.peek_batch(10).await.unwrap();
        assert_eq!(
            remaining.iter().map(|s| s.sequence).collect::<Vec<_>>(),
            vec![4, 5]
        );
        assert_eq!(sink.uploads(), vec![("s1".to_string(), vec![1, 2, 3])]);
    }

    #[tokio::test]
    async fn failure_keeps_queue_and_retry_delivers_the_same_samples() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MockSink::failing_then_ok(1));
        let ctx = context(&dir, sink.clone());

        for _ in 0..3 {
            ctx.db.enqueue_sample("s1", &fix(), 0).await.unwrap();
        }

        assert!(flush_once(&ctx).await.is_err());
        assert_eq!(ctx.db.pending_count().await.unwrap(), 3);
        assert!(sink.uploads().is_empty());

        let outcome = flush_once(&ctx).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Delivered { count: 3, up_to: 3 });
        assert_eq!(ctx.db.pending_count().await.unwrap(), 0);
        assert_eq!(sink.uploads(), vec![("s1".to_string(), vec![1, 2, 3])]);
    }

    #[tokio::test]
    async fn batches_never_mix_sessions() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MockSink::default());
        let ctx = context(&dir, sink.clone());

        for _ in 0..2 {
            ctx.db.enqueue_sample("s1", &fix(), 0).await.unwrap();
        }
        for _ in 0..3 {
            ctx.db.enqueue_sample("s2", &fix(), 0).await.unwrap();
        }

        let first = flush_once(&ctx).await.unwrap();
        assert_eq!(first, FlushOutcome::Delivered { count: 2, up_to: 2 });
        let second = flush_once(&ctx).await.unwrap();
        assert_eq!(second, FlushOutcome::Delivered { count: 3, up_to: 5 });

        assert_eq!(
            sink.uploads(),
            vec![
                ("s1".to_string(), vec![1, 2]),
                ("s2".to_string(), vec![3, 4, 5]),
            ]
        );
    }

    struct FixedProvider;

    #[async_trait]
    impl crate::sampling::provider::PositionProvider for FixedProvider {
        async fn current_fix(&self) -> Result<PositionFix> {
            Ok(fix())
        }
    }

    // Three captures land while the network is down for two sync attempts;
    // the third attempt delivers the whole backlog.
    #[tokio::test]
    async fn outage_then_recovery_drains_the_backlog() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MockSink::failing_then_ok(2));
        let ctx = context(&dir, sink.clone());
        let mut backoff = Backoff::new(ctx.backoff_base, ctx.backoff_cap);

        let capture_ctx = CaptureContext {
            session_id: "session-7-42".to_string(),
            provider: Arc::new(FixedProvider),
            db: ctx.db.clone(),
            broadcaster: ctx.broadcaster.clone(),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            queue_capacity: 0,
        };
        for _ in 0..3 {
            perform_capture(&capture_ctx).await.unwrap();
        }

        // Two attempts against a dead network: nothing lost, error visible.
        assert!(run_attempt(&ctx, &mut backoff).await.is_some());
        assert!(run_attempt(&ctx, &mut backoff).await.is_some());
        let snapshot = ctx.broadcaster.snapshot();
        assert!(snapshot.last_error.is_some());
        assert_eq!(snapshot.queue_size, 3);
        assert_eq!(ctx.db.pending_count().await.unwrap(), 3);
        assert_eq!(backoff.failures(), 2);

        // Network recovers: the third attempt delivers everything.
        assert!(run_attempt(&ctx, &mut backoff).await.is_none());
        let snapshot = ctx.broadcaster.snapshot();
        assert!(snapshot.last_error.is_none());
        assert!(snapshot.last_update.is_some());
        assert_eq!(snapshot.queue_size, 0);
        assert_eq!(backoff.failures(), 0);
        assert_eq!(
            sink.uploads(),
            vec![("session-7-42".to_string(), vec![1, 2, 3])]
        );
    }

    #[tokio::test]
    async fn trigger_fires_an_immediate_attempt() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MockSink::default());
        // Interval long enough that only the startup pass and the manual
        // trigger can flush.
        let ctx = SyncContext {
            sync_interval: Duration::from_secs(3600),
            ..context(&dir, sink.clone())
        };

        let mut controller = SyncController::new();
        let trigger = controller.start(ctx.clone()).unwrap();

        // Let the startup pass run against an empty queue.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.uploads().is_empty());

        ctx.db.enqueue_sample("s1", &fix(), 0).await.unwrap();
        trigger.fire();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sink.uploads(), vec![("s1".to_string(), vec![1])]);
        assert_eq!(ctx.db.pending_count().await.unwrap(), 0);

        controller.stop().await.unwrap();
    }
}
