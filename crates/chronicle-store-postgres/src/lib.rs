#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **chronicle-store-postgres** – PostgreSQL-backed log for Chronicle.
//!
//! Structurally the same `events` table as `chronicle-store-sqlite`, but
//! conflict detection uses `ON CONFLICT ... DO NOTHING RETURNING` instead of
//! catching a unique-violation error: Postgres aborts the whole transaction
//! on the first statement error, where SQLite does not, so the "try the
//! insert, see if anything came back" style is the portable way to get a
//! per-row conflict signal without losing the rest of the batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use chronicle_store_core::{LogBackend, NewStoredEvent, SelectEventsQuery, StorageError, StoredEvent, StreamId};
use chronicle_types::Topic;

/// A persistent log backend using a PostgreSQL database.
#[derive(Debug)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connects to the database at `database_url` and runs migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPool::connect(database_url).await.map_err(|e| StorageError::BackendError(e.to_string()))?;
        Self::from_pool(pool).await
    }

    /// Builds a backend from an existing pool, running migrations.
    pub async fn from_pool(pool: PgPool) -> Result<Self, StorageError> {
        let backend = Self { pool };
        backend.migrate().await?;
        Ok(backend)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                notification_id BIGSERIAL PRIMARY KEY,
                originator_id TEXT NOT NULL,
                originator_version BIGINT NOT NULL,
                topic TEXT NOT NULL,
                state BYTEA NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
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

fn row_to_stored_event(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, StorageError> {
    Ok(StoredEvent {
        notification_id: row
            .try_get::<i64, _>("notification_id")
            .map_err(|e| StorageError::BackendError(e.to_string()))? as u64,
        originator_id: StreamId::from(
            row.try_get::<String, _>("originator_id").map_err(|e| StorageError::BackendError(e.to_string()))?,
        ),
        originator_version: row
            .try_get::<i64, _>("originator_version")
            .map_err(|e| StorageError::BackendError(e.to_string()))? as u64,
        topic: Topic::new(row.try_get::<String, _>("topic").map_err(|e| StorageError::BackendError(e.to_string()))?),
        state: row.try_get("state").map_err(|e| StorageError::BackendError(e.to_string()))?,
        timestamp: row
            .try_get::<DateTime<Utc>, _>("timestamp")
            .map_err(|e| StorageError::BackendError(e.to_string()))?,
    })
}

#[async_trait]
impl LogBackend for PostgresBackend {
    async fn create_table(&self) -> Result<(), StorageError> {
        self.migrate().await
    }

    async fn insert_events(&self, events: Vec<NewStoredEvent>) -> Result<(), StorageError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(|e| StorageError::BackendError(e.to_string()))?;

        for event in &events {
            let inserted = sqlx::query(
                r#"
                INSERT INTO events (originator_id, originator_version, topic, state, timestamp)
                VALUES ($1, $2, $3, $4, now())
                ON CONFLICT (originator_id, originator_version) DO NOTHING
                RETURNING notification_id
                "#,
            )
            .bind(event.originator_id.as_str())
            .bind(event.originator_version as i64)
            .bind(event.topic.as_str())
            .bind(&event.state)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

            if inserted.is_none() {
                return Err(StorageError::ConcurrencyConflict {
                    stream: event.originator_id.to_string(),
                    version: event.originator_version,
                });
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
            WHERE originator_id = $1
              AND originator_version > $2
              AND originator_version <= $3
            ORDER BY originator_version {order}
            LIMIT $4
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
            WHERE notification_id >= $1
            ORDER BY notification_id ASC
            LIMIT $2
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

// Integration tests for this backend require a live Postgres instance and
// are intentionally not included here; `chronicle-store-sqlite` and
// `chronicle-store-memory` carry the shared `LogBackend` contract tests.
