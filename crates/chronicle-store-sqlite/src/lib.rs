#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **chronicle-store-sqlite** – SQLite-backed log for Chronicle.
//!
//! A single `events` table holds every stream, keyed by the
//! `(originator_id, originator_version)` unique constraint that gives the
//! whole crate its optimistic concurrency guarantee, with `notification_id`
//! an autoincrementing primary key supplying the global ordering.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use chronicle_store_core::{LogBackend, NewStoredEvent, SelectEventsQuery, StorageError, StoredEvent, StreamId};
use chronicle_types::Topic;

/// A persistent log backend using a SQLite database.
#[derive(Debug)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Opens or creates a SQLite database at the given path, running
    /// migrations if needed.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        let pool = SqlitePool::connect(&database_url)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        Self::from_pool(pool).await
    }

    /// Opens an in-memory SQLite database. Useful for tests.
    ///
    /// Pinned to a single pooled connection: `:memory:` databases are
    /// private to the connection that created them, so a pool handing out
    /// more than one connection would silently scatter reads and writes
    /// across separate, empty databases under any concurrent use.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        Self::from_pool(pool).await
    }

    /// Builds a backend from an existing pool, running migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let backend = Self { pool };
        backend.migrate().await?;
        Ok(backend)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                notification_id INTEGER PRIMARY KEY AUTOINCREMENT,
                originator_id TEXT NOT NULL,
                originator_version INTEGER NOT NULL,
                topic TEXT NOT NULL,
                state BLOB NOT NULL,
                timestamp TEXT NOT NULL,
                UNIQUE (originator_id, originator_version)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::BackendError(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_originator ON events(originator_id, originator_version)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        Ok(())
    }

    /// Close the pool, waiting for outstanding connections to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_stored_event(row: &sqlx::sqlite::SqliteRow) -> Result<StoredEvent, StorageError> {
    let timestamp: String = row.try_get("timestamp").map_err(|e| StorageError::BackendError(e.to_string()))?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| StorageError::BackendError(e.to_string()))?
        .with_timezone(&Utc);
    let originator_id: String =
        row.try_get("originator_id").map_err(|e| StorageError::BackendError(e.to_string()))?;
    let topic: String = row.try_get("topic").map_err(|e| StorageError::BackendError(e.to_string()))?;

    Ok(StoredEvent {
        notification_id: row
            .try_get::<i64, _>("notification_id")
            .map_err(|e| StorageError::BackendError(e.to_string()))? as u64,
        originator_id: StreamId::from(originator_id),
        originator_version: row
            .try_get::<i64, _>("originator_version")
            .map_err(|e| StorageError::BackendError(e.to_string()))? as u64,
        topic: Topic::new(topic),
        state: row.try_get("state").map_err(|e| StorageError::BackendError(e.to_string()))?,
        timestamp,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl LogBackend for SqliteBackend {
    async fn create_table(&self) -> Result<(), StorageError> {
        self.migrate().await
    }

    async fn insert_events(&self, events: Vec<NewStoredEvent>) -> Result<(), StorageError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(|e| StorageError::BackendError(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        for event in &events {
            let result = sqlx::query(
                r#"
                INSERT INTO events (originator_id, originator_version, topic, state, timestamp)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(event.originator_id.as_str())
            .bind(event.originator_version as i64)
            .bind(event.topic.as_str())
            .bind(&event.state)
            .bind(&now)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(StorageError::ConcurrencyConflict {
                        stream: event.originator_id.to_string(),
                        version: event.originator_version,
                    });
                }
                Err(e) => return Err(StorageError::BackendError(e.to_string())),
            }
        }

        tx.commit().await.map_err(|e| StorageError::BackendError(e.to_string()))?;
        Ok(())
    }

    async fn select_events(&self, stream: &StreamId, query: SelectEventsQuery) -> Result<Vec<StoredEvent>, StorageError> {
        let order = if query.descending { "DESC" } else { "ASC" };
        let sql = format!(
            r#"
            SELECT notification_id, originator_id, originator_version, topic, state, timestamp
            FROM events
            WHERE originator_id = ?
              AND originator_version > ?
              AND originator_version <= ?
            ORDER BY originator_version {order}
            LIMIT ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(stream.as_str())
            .bind(query.after_version.map(|v| v as i64).unwrap_or(-1))
            .bind(query.before_or_eq_version.unwrap_or(i64::MAX as u64) as i64)
            .bind(query.limit.unwrap_or(i64::MAX as usize) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        rows.iter().map(row_to_stored_event).collect()
    }

    async fn select_notifications(&self, start: u64, limit: usize) -> Result<Vec<StoredEvent>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT notification_id, originator_id, originator_version, topic, state, timestamp
            FROM events
            WHERE notification_id >= ?
            ORDER BY notification_id ASC
            LIMIT ?
            "#,
        )
        .bind(start as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::BackendError(e.to_string()))?;

        rows.iter().map(row_to_stored_event).collect()
    }

    async fn max_notification_id(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COALESCE(MAX(notification_id), 0) as max_id FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        Ok(row.try_get::<i64, _>("max_id").map_err(|e| StorageError::BackendError(e.to_string()))? as u64)
    }
}
