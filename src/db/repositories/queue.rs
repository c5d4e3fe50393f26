use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_battery, to_i64, to_u64},
};
use crate::models::{PositionFix, Sample};

/// Result of persisting one sample.
///
/// `evicted` carries the sequence of the sample dropped to make room when
/// the queue was at capacity; callers surface it, eviction is never silent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub sequence: u64,
    pub evicted: Option<u64>,
    pub pending: u64,
}

impl Database {
    /// Appends a sample to the durable queue, assigning the next sequence.
    ///
    /// When the queue already holds `capacity` pending samples the oldest
    /// one is deleted first. A `capacity` of zero disables the cap.
    pub async fn enqueue_sample(
        &self,
        session_id: &str,
        fix: &PositionFix,
        capacity: u64,
    ) -> Result<EnqueueOutcome> {
        let session_id = session_id.to_string();
        let fix = fix.clone();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open enqueue transaction")?;

            let mut evicted = None;
            if capacity > 0 {
                let pending: i64 =
                    tx.query_row("SELECT COUNT(*) FROM pending_samples", [], |row| row.get(0))?;
                if to_u64(pending, "pending count")? >= capacity {
                    let oldest: Option<i64> = tx.query_row(
                        "SELECT MIN(sequence) FROM pending_samples",
                        [],
                        |row| row.get(0),
                    )?;
                    if let Some(sequence) = oldest {
                        tx.execute(
                            "DELETE FROM pending_samples WHERE sequence = ?1",
                            params![sequence],
                        )?;
                        evicted = Some(to_u64(sequence, "sequence")?);
                    }
                }
            }

            tx.execute(
                "UPDATE queue_state SET last_sequence = last_sequence + 1 WHERE id = 1",
                [],
            )
            .context("failed to advance sequence counter")?;
            let sequence: i64 = tx.query_row(
                "SELECT last_sequence FROM queue_state WHERE id = 1",
                [],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT INTO pending_samples (
                    sequence,
                    session_id,
                    captured_at,
                    latitude,
                    longitude,
                    accuracy_m,
                    speed_mps,
                    heading_deg,
                    battery_level
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    sequence,
                    session_id,
                    fix.captured_at.to_rfc3339(),
                    fix.latitude,
                    fix.longitude,
                    fix.accuracy_m,
                    fix.speed_mps,
                    fix.heading_deg,
                    fix.battery_level.map(i64::from),
                ],
            )
            .with_context(|| "failed to insert sample")?;

            let pending: i64 =
                tx.query_row("SELECT COUNT(*) FROM pending_samples", [], |row| row.get(0))?;

            tx.commit().context("failed to commit enqueue")?;

            Ok(EnqueueOutcome {
                sequence: to_u64(sequence, "sequence")?,
                evicted,
                pending: to_u64(pending, "pending count")?,
            })
        })
        .await
    }

    /// Returns up to `max` oldest pending samples in sequence order without
    /// removing them, so a failed delivery attempt can be retried.
    pub async fn peek_batch(&self, max: usize) -> Result<Vec<Sample>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT
                    sequence,
                    session_id,
                    captured_at,
                    latitude,
                    longitude,
                    accuracy_m,
                    speed_mps,
                    heading_deg,
                    battery_level
                FROM pending_samples
                ORDER BY sequence ASC
                LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![to_i64(max as u64)?])?;
            let mut samples = Vec::new();
            while let Some(row) = rows.next()? {
                let sequence: i64 = row.get(0)?;
                let captured_at: String = row.get(2)?;
                let battery_level: Option<i64> = row.get(8)?;
                samples.push(Sample {
                    sequence: to_u64(sequence, "sequence")?,
                    session_id: row.get(1)?,
                    fix: PositionFix {
                        captured_at: parse_datetime(&captured_at, "captured_at")?,
                        latitude: row.get(3)?,
                        longitude: row.get(4)?,
                        accuracy_m: row.get(5)?,
                        speed_mps: row.get(6)?,
                        heading_deg: row.get(7)?,
                        battery_level: to_battery(battery_level)?,
                    },
                });
            }

            Ok(samples)
        })
        .await
    }

    /// Permanently removes every sample with `sequence <= up_to`.
    ///
    /// Idempotent: acknowledging an already-removed range removes nothing
    /// and is not an error. A range beyond any assigned sequence is clamped
    /// rather than rejected, so a benign race cannot take down the agent.
    pub async fn acknowledge_up_to(&self, up_to: u64) -> Result<usize> {
        let up_to = up_to.min(i64::MAX as u64);
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM pending_samples WHERE sequence <= ?1",
                params![to_i64(up_to)?],
            )?;
            Ok(removed)
        })
        .await
    }

    pub async fn pending_count(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM pending_samples", [], |row| row.get(0))?;
            to_u64(count, "pending count")
        })
        .await
    }
}
