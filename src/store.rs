//! Durable, append-only chat history backed by SQLite.

use std::{future::Future, str::FromStr, time::Duration};

use anyhow::Context;
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use thiserror::Error;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message body is empty")]
    Validation,

    #[error("message store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A persisted chat message. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub author: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

type MessageRow = (i64, String, String, PrimitiveDateTime);

impl From<MessageRow> for ChatMessage {
    fn from((id, author, body, timestamp): MessageRow) -> Self {
        Self {
            id,
            author,
            body,
            timestamp: timestamp.assume_utc(),
        }
    }
}

/// Persistence used by the session coordinator.
pub trait MessageStore: Send + Sync + 'static {
    /// Stores `body` (trimmed) under `author` and returns the new record.
    fn append(
        &self,
        author: &str,
        body: &str,
    ) -> impl Future<Output = StoreResult<ChatMessage>> + Send;

    /// Up to `limit` most recent messages, oldest first.
    fn recent(&self, limit: u32) -> impl Future<Output = StoreResult<Vec<ChatMessage>>> + Send;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url` and ensures the schema exists.
    ///
    /// `timeout` bounds both pool acquisition and SQLite's busy wait, so a
    /// locked or unreachable database surfaces as an error instead of a hang.
    pub async fn connect(url: &str, max_connections: u32, timeout: Duration) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url {url}"))?
            .create_if_missing(true)
            .busy_timeout(timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database {url}"))?;

        let store = Self::from_pool(pool);
        store.migrate().await.context("failed to create messages table")?;

        info!(url, "message store ready");
        Ok(store)
    }

    /// A private in-memory database. Lives as long as the store's single connection.
    pub async fn in_memory() -> sqlx::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                message TEXT NOT NULL,
                timestamp DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl MessageStore for SqliteStore {
    async fn append(&self, author: &str, body: &str) -> StoreResult<ChatMessage> {
        let body = body.trim();
        if body.is_empty() {
            return Err(StoreError::Validation);
        }

        let row: MessageRow = sqlx::query_as(
            "INSERT INTO messages (username,message) VALUES (?,?) RETURNING id,username,message,timestamp",
        )
        .bind(author)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;

        let message = ChatMessage::from(row);
        debug!(id = message.id, author, "stored message");
        Ok(message)
    }

    async fn recent(&self, limit: u32) -> StoreResult<Vec<ChatMessage>> {
        let mut rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id,username,message,timestamp FROM messages ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }
}
