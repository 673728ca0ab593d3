//! SQLite storage layer.
//!
//! Persistent backend for the notification archive and the emergency
//! records. Rows carry the full entry as a JSON payload next to the
//! columns queries filter on; the payload is the source of truth and
//! the columns are derived from it at insert time.
//!
//! The archive keeps the same per-recipient bound as the in-memory
//! store: every append trims the recipient's rows back down to the cap,
//! oldest first.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::warn;
use uuid::Uuid;

use crate::coordinator::{EmergencyRecord, EmergencyStore};
use crate::history::{HistoryStore, MAX_HISTORY_PER_RECIPIENT};
use crate::model::{DeliveryStats, HistoryFilter, NotificationHistoryEntry};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:beacon.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notification_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for per-recipient queries with a time lower bound
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_notification_history_user_ts
            ON notification_history(user_id, ts)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS emergencies (
                id TEXT PRIMARY KEY,
                updated_ts INTEGER NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Deserialize one archived history row, skipping rows that no
    /// longer decode (e.g. after an incompatible deploy).
    fn decode_entry(payload: &str) -> Option<NotificationHistoryEntry> {
        match serde_json::from_str(payload) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping undecodable history row");
                None
            }
        }
    }
}

#[async_trait]
impl HistoryStore for Storage {
    async fn append(&self, user_id: &str, entry: NotificationHistoryEntry) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&entry)?;
        let ts = entry.timestamp.timestamp();

        sqlx::query(
            r#"
            INSERT INTO notification_history (user_id, ts, payload)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(ts)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        // Trim back down to the cap, oldest rows first
        sqlx::query(
            r#"
            DELETE FROM notification_history
            WHERE user_id = ? AND id NOT IN (
                SELECT id FROM notification_history
                WHERE user_id = ?
                ORDER BY id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(MAX_HISTORY_PER_RECIPIENT as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        filter: &HistoryFilter,
    ) -> anyhow::Result<Vec<NotificationHistoryEntry>> {
        // Push the coarse time bound into SQL; the exact filter runs on
        // the decoded entries. The per-recipient cap bounds the scan.
        let since_ts = filter.since.map(|s| s.timestamp()).unwrap_or(i64::MIN);

        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM notification_history
            WHERE user_id = ? AND ts >= ?
            ORDER BY id DESC
            "#,
        )
        .bind(user_id)
        .bind(since_ts)
        .fetch_all(&self.pool)
        .await?;

        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut entries = Vec::new();
        for row in &rows {
            let payload: String = row.get("payload");
            if let Some(entry) = Self::decode_entry(&payload)
                && filter.matches(&entry)
            {
                entries.push(entry);
                if entries.len() >= limit {
                    break;
                }
            }
        }
        Ok(entries)
    }

    async fn stats(&self, user_id: &str) -> anyhow::Result<DeliveryStats> {
        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM notification_history
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let entries: Vec<NotificationHistoryEntry> = rows
            .iter()
            .filter_map(|row| {
                let payload: String = row.get("payload");
                Self::decode_entry(&payload)
            })
            .collect();

        Ok(DeliveryStats::from_entries(&entries))
    }
}

#[async_trait]
impl EmergencyStore for Storage {
    async fn insert(&self, record: &EmergencyRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_string(record)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO emergencies (id, updated_ts, payload)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.updated_at.timestamp())
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<EmergencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT payload
            FROM emergencies
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, record: &EmergencyRecord) -> anyhow::Result<()> {
        self.insert(record).await
    }
}
