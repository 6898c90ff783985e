//! Database access for songline-orchestrator
//!
//! SQLite via sqlx. The orchestrator core only sees the [`SongStore`] and
//! [`JobStore`] traits; the `Sqlite*` types are the production implementations.

pub mod jobs;
pub mod songs;

use async_trait::async_trait;
use songline_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{Job, Song};

pub use jobs::{fail_interrupted_jobs, SqliteJobStore};
pub use songs::SqliteSongStore;

/// Persistence collaborator contract for song records
#[async_trait]
pub trait SongStore: Send + Sync {
    /// Insert `song`, or return the existing row holding the same fingerprint
    ///
    /// Must be a single serializable operation: two racing callers with the same
    /// fingerprint both receive the same persisted row.
    async fn insert_or_get_by_fingerprint(&self, song: &Song) -> Result<Song>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Song>>;

    /// Exact fingerprint lookup
    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Song>>;

    /// Case-insensitive title/artist lookup, newest match wins
    async fn get_by_title_artist(&self, title: &str, artist: &str) -> Result<Option<Song>>;

    /// All songs, newest first
    async fn list_all(&self) -> Result<Vec<Song>>;
}

/// Durable job history
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the record for `job.id`
    async fn save(&self, job: &Job) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// Newest first
    async fn list_recent(&self, limit: usize) -> Result<Vec<Job>>;
}

/// Initialize database connection pool
///
/// Creates the file (and parent directory) if missing and ensures the schema.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables and indexes if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS songs (
            id TEXT PRIMARY KEY,
            title TEXT,
            artist TEXT,
            duration_seconds REAL,
            fingerprint TEXT,
            fingerprint_hash TEXT UNIQUE,
            lyrics TEXT,
            classification TEXT,
            confidence REAL,
            source_artifact_ref TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_songs_created_at ON songs (created_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_songs_title_artist \
         ON songs (title COLLATE NOCASE, artist COLLATE NOCASE)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            input_kind TEXT NOT NULL,
            status TEXT NOT NULL,
            state TEXT NOT NULL,
            last_stage TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs (created_at DESC)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (songs, jobs)");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_creates_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("songline.db");

        let pool = init_database_pool(&db_path).await.unwrap();
        assert!(db_path.exists());

        // Second run must not fail on existing objects
        init_tables(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, vec!["jobs".to_string(), "songs".to_string()]);
    }
}
