//! Sqlite-backed persistence.
//!
//! Two concerns share one database file:
//! - **index chunks** — serialised [`FieldEntry`] batches spilled by the
//!   embedding index when the in-memory map crosses the spill threshold;
//! - **conversations** — journaled question/answer records, one row per
//!   question (a re-answer supersedes the previous row).
//!
//! Migrations are idempotent `CREATE TABLE IF NOT EXISTS` statements; `init`
//! can be run any number of times.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::journal::RecordSink;
use crate::models::{ConversationRecord, FieldEntry};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A chunk write was refused because it exceeds the configured cap.
    #[error("Chunk of {needed} bytes exceeds store quota of {limit} bytes")]
    Quota { needed: usize, limit: usize },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialisation error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct Store {
    pool: SqlitePool,
    max_chunk_bytes: usize,
}

impl Store {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let db_path = &config.path;

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            max_chunk_bytes: config.max_chunk_bytes,
        })
    }

    /// In-memory store for tests. The single connection is pinned: an
    /// in-memory database dies with its connection.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            max_chunk_bytes: 8 * 1024 * 1024,
        })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_chunks (
                chunk_idx INTEGER PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT NOT NULL,
                company TEXT NOT NULL,
                job_title TEXT NOT NULL,
                question_id TEXT NOT NULL,
                messages_json TEXT NOT NULL,
                answer TEXT NOT NULL,
                options_json TEXT,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (company, job_title, question_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_created_at \
             ON conversations(created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============ Index chunks ============

    pub async fn put_index_chunk(
        &self,
        chunk_idx: i64,
        entries: &[FieldEntry],
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(entries)?;
        if payload.len() > self.max_chunk_bytes {
            return Err(StoreError::Quota {
                needed: payload.len(),
                limit: self.max_chunk_bytes,
            });
        }

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO index_chunks (chunk_idx, payload, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(chunk_idx) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at
            "#,
        )
        .bind(chunk_idx)
        .bind(&payload)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_index_chunk(&self, chunk_idx: i64) -> Result<Vec<FieldEntry>, StoreError> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM index_chunks WHERE chunk_idx = ?")
                .bind(chunk_idx)
                .fetch_optional(&self.pool)
                .await?;

        match payload {
            Some(p) => Ok(serde_json::from_str(&p)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn index_chunk_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn clear_index(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM index_chunks")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Conversations ============

    pub async fn put_conversation(&self, record: &ConversationRecord) -> Result<(), StoreError> {
        let messages_json = serde_json::to_string(&record.messages)?;
        let options_json = record
            .options
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO conversations
                (id, company, job_title, question_id, messages_json, answer, options_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(company, job_title, question_id) DO UPDATE SET
                id = excluded.id,
                messages_json = excluded.messages_json,
                answer = excluded.answer,
                options_json = excluded.options_json,
                created_at = excluded.created_at
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&record.company)
        .bind(&record.job_title)
        .bind(&record.question_id)
        .bind(&messages_json)
        .bind(&record.answer)
        .bind(&options_json)
        .bind(record.timestamp.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn conversation_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Latest conversations, newest first, for the `stats` command.
    pub async fn recent_conversations(
        &self,
        limit: i64,
    ) -> Result<Vec<(String, String, i64)>, StoreError> {
        let rows = sqlx::query(
            "SELECT question_id, answer, created_at FROM conversations \
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get("question_id"), r.get("answer"), r.get("created_at")))
            .collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// The persistence collaborator: journal records land in the `conversations`
/// table. Forward failures carry no delivery guarantee.
pub struct SqliteSink {
    store: Arc<Store>,
}

impl SqliteSink {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn record(&self, record: &ConversationRecord) -> Result<()> {
        self.store.put_conversation(record).await?;
        Ok(())
    }
}
