use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime},
};
use crate::models::TrackingSession;

impl Database {
    pub async fn insert_session(&self, session: &TrackingSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, driver_id, vehicle_id, started_at, ended_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.driver_id,
                    record.vehicle_id,
                    record.started_at.to_rfc3339(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                ],
            )
            .with_context(|| "failed to insert session")?;
            Ok(())
        })
        .await
    }

    pub async fn mark_session_ended(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions SET ended_at = ?1 WHERE id = ?2",
                params![ended_at.to_rfc3339(), session_id],
            )
            .with_context(|| "failed to mark session ended")?;
            Ok(())
        })
        .await
    }

    pub async fn get_open_session(&self) -> Result<Option<TrackingSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, driver_id, vehicle_id, started_at, ended_at
                 FROM sessions
                 WHERE ended_at IS NULL
                 ORDER BY started_at DESC
                 LIMIT 1",
            )?;

            let mut rows = stmt.query([])?;
            if let Some(row) = rows.next()? {
                let started_at: String = row.get(3)?;
                let ended_at: Option<String> = row.get(4)?;
                Ok(Some(TrackingSession {
                    id: row.get(0)?,
                    driver_id: row.get(1)?,
                    vehicle_id: row.get(2)?,
                    started_at: parse_datetime(&started_at, "started_at")?,
                    ended_at: parse_optional_datetime(ended_at, "ended_at")?,
                }))
            } else {
                Ok(None)
            }
        })
        .await
    }

    /// Closes sessions a previous process left open. Returns how many rows
    /// were touched so the caller can log the recovery.
    pub async fn close_open_sessions(&self, ended_at: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let closed = conn.execute(
                "UPDATE sessions SET ended_at = ?1 WHERE ended_at IS NULL",
                params![ended_at.to_rfc3339()],
            )?;
            Ok(closed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use crate::db::Database;
    use crate::models::TrackingSession;

    fn session(id: &str) -> TrackingSession {
        TrackingSession {
            id: id.to_string(),
            driver_id: "driver-7".to_string(),
            vehicle_id: Some("vehicle-42".to_string()),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn open_session_round_trips() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("waytrack.sqlite3")).unwrap();

        assert!(db.get_open_session().await.unwrap().is_none());

        db.insert_session(&session("a")).await.unwrap();
        let open = db.get_open_session().await.unwrap().expect("session open");
        assert_eq!(open.id, "a");
        assert_eq!(open.driver_id, "driver-7");
        assert!(open.is_active());

        db.mark_session_ended("a", Utc::now()).await.unwrap();
        assert!(db.get_open_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_open_sessions_recovers_stale_rows() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("waytrack.sqlite3")).unwrap();

        db.insert_session(&session("a")).await.unwrap();
        db.insert_session(&session("b")).await.unwrap();

        let closed = db.close_open_sessions(Utc::now()).await.unwrap();
        assert_eq!(closed, 2);
        assert!(db.get_open_session().await.unwrap().is_none());

        // Nothing left open, so recovery is a no-op the second time.
        assert_eq!(db.close_open_sessions(Utc::now()).await.unwrap(), 0);
    }
}
