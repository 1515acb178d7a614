use crate::desk::Desk;
use anyhow::{Context, Result};
use robopilot_core::{AccountState, DeskEvent, Position};
use robopilot_risk::DailyArchive;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// `SQLite` journal of desk state.
///
/// Holds the latest account snapshot, open positions, the event journal and
/// closed trading days, so a restarted process resumes with the same
/// balance, streak and positions.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Connects and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns error if connection fails or migrations fail.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to open state database {database_url}"))?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns error if connection fails.
    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Self> {
        // one connection: each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub async fn save_snapshot(&self, state: &AccountState) -> Result<()> {
        let state_json = serde_json::to_string(state)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r"
            INSERT INTO account_state (id, state_json, updated_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            ",
        )
        .bind(state_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    ///
    /// Returns error if the query or deserialization fails.
    pub async fn load_snapshot(&self) -> Result<Option<AccountState>> {
        let row = sqlx::query_as::<_, (String,)>("SELECT state_json FROM account_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(json,)| serde_json::from_str(&json).context("Corrupt account snapshot"))
            .transpose()
    }

    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub async fn record_event(&self, event: &DeskEvent) -> Result<()> {
        let payload = serde_json::to_value(event)?;
        let event_type = payload
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query("INSERT INTO desk_events (event_type, payload_json, recorded_at) VALUES (?1, ?2, ?3)")
            .bind(event_type)
            .bind(payload.to_string())
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Journal entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query or deserialization fails.
    pub async fn load_events(&self) -> Result<Vec<DeskEvent>> {
        let rows = sqlx::query_as::<_, (String,)>("SELECT payload_json FROM desk_events ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        for (payload,) in rows {
            events.push(serde_json::from_str(&payload)?);
        }
        Ok(events)
    }

    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        let position_json = serde_json::to_string(position)?;

        sqlx::query(
            r"
            INSERT INTO open_positions (position_id, position_json, opened_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(position_id) DO UPDATE SET
                position_json = excluded.position_json
            ",
        )
        .bind(position.id.to_string())
        .bind(position_json)
        .bind(position.open_timestamp.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn remove_position(&self, position_id: uuid::Uuid) -> Result<()> {
        sqlx::query("DELETE FROM open_positions WHERE position_id = ?1")
            .bind(position_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Makes the table hold exactly `positions`, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or any write fails; the table is then
    /// left as it was.
    pub async fn replace_positions(&self, positions: &[Position]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM open_positions").execute(&mut *tx).await?;
        for position in positions {
            sqlx::query("INSERT INTO open_positions (position_id, position_json, opened_at) VALUES (?1, ?2, ?3)")
                .bind(position.id.to_string())
                .bind(serde_json::to_string(position)?)
                .bind(position.open_timestamp.timestamp())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns error if the query or deserialization fails.
    pub async fn load_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, (String,)>("SELECT position_json FROM open_positions ORDER BY opened_at ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut positions = Vec::with_capacity(rows.len());
        for (json,) in rows {
            positions.push(serde_json::from_str(&json)?);
        }
        Ok(positions)
    }

    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub async fn archive_day(&self, archive: &DailyArchive) -> Result<()> {
        let archive_json = serde_json::to_string(archive)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r"
            INSERT INTO daily_archive (day, archive_json, archived_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(day) DO UPDATE SET
                archive_json = excluded.archive_json,
                archived_at = excluded.archived_at
            ",
        )
        .bind(archive.day.to_string())
        .bind(archive_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    ///
    /// Returns error if the query or deserialization fails.
    pub async fn load_archive(&self) -> Result<Vec<DailyArchive>> {
        let rows = sqlx::query_as::<_, (String,)>("SELECT archive_json FROM daily_archive ORDER BY day ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut days = Vec::with_capacity(rows.len());
        for (json,) in rows {
            days.push(serde_json::from_str(&json)?);
        }
        Ok(days)
    }

    async fn persist(&self, desk: &Desk, event: &DeskEvent) -> Result<()> {
        self.record_event(event).await?;
        match event {
            DeskEvent::Filled { position } => self.save_position(position).await?,
            DeskEvent::PositionClosed { position_id, .. } => self.remove_position(*position_id).await?,
            _ => {}
        }
        self.save_snapshot(&desk.snapshot()).await
    }
}

/// Mirrors desk events into the store until the desk is dropped.
#[must_use]
pub fn spawn_persistence(store: SqliteStateStore, desk: Arc<Desk>) -> JoinHandle<()> {
    let mut events = desk.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = store.persist(&desk, &event).await {
                        warn!(error = %e, "Failed to persist desk event");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Persistence fell behind, journal has gaps");
                    // missed fills and closes: take the desk's book as truth
                    if let Err(e) = store.replace_positions(&desk.open_positions()).await {
                        warn!(error = %e, "Failed to re-sync positions");
                    }
                    if let Err(e) = store.save_snapshot(&desk.snapshot()).await {
                        warn!(error = %e, "Failed to re-sync account snapshot");
                    }
                }
                Err(RecvError::Closed) => {
                    debug!("Desk event channel closed, persistence stopped");
                    break;
                }
            }
        }
    })
}
