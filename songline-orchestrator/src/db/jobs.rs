//! Job record persistence
//!
//! Every tracker transition is upserted here so job history survives a
//! restart. Jobs that were queued or running when the process stopped are
//! failed as interrupted on the next startup.

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::de::DeserializeOwned;
use serde::Serialize;
use songline_common::{time::parse_rfc3339, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::JobStore;
use crate::models::{FailureKind, Job, JobFailure, JobState, JobStatus};

const JOB_COLUMNS: &str = "id, input_kind, state, last_stage, created_at, updated_at";

pub const INTERRUPTED_REASON: &str = "Job interrupted by orchestrator restart";

/// SQLite-backed [`JobStore`]
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        save_job(&self.pool, job).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        load_job(&self.pool, id).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Job>> {
        list_recent_jobs(&self.pool, limit).await
    }
}

/// Insert or update a job record
pub async fn save_job(pool: &SqlitePool, job: &Job) -> Result<()> {
    // Prepare all data before touching the pool
    let input_kind = to_text(&job.input_kind)?;
    let state = serde_json::to_string(&job.state)
        .map_err(|e| Error::Internal(format!("Failed to serialize job state: {}", e)))?;
    let last_stage = job.last_stage.as_ref().map(to_text).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO jobs (id, input_kind, status, state, last_stage, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            state = excluded.state,
            last_stage = excluded.last_stage,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(job.id.to_string())
    .bind(input_kind)
    .bind(job.status().as_str())
    .bind(state)
    .bind(last_stage)
    .bind(job.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
    .bind(job.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load job by id
pub async fn load_job(pool: &SqlitePool, id: Uuid) -> Result<Option<Job>> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Most recently created jobs, newest first
pub async fn list_recent_jobs(pool: &SqlitePool, limit: usize) -> Result<Vec<Job>> {
    let sql = format!(
        "SELECT {} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    rows.iter().map(job_from_row).collect()
}

/// Fail every job left queued or running by a previous process
///
/// Call once on startup, before any new job is accepted. Returns the number of
/// jobs marked.
pub async fn fail_interrupted_jobs(pool: &SqlitePool) -> Result<usize> {
    let sql = format!(
        "SELECT {} FROM jobs WHERE status IN (?, ?)",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::Running.as_str())
        .fetch_all(pool)
        .await?;

    let mut marked = 0;
    for row in &rows {
        let mut job = job_from_row(row)?;
        let stage = job.current_stage().or(job.last_stage);
        job.transition_to(JobState::Failed {
            failure: JobFailure {
                stage,
                kind: FailureKind::Interrupted,
                reason: INTERRUPTED_REASON.to_string(),
            },
        });
        save_job(pool, &job).await?;
        tracing::warn!(job_id = %job.id, stage = ?stage, "Marked interrupted job as failed");
        marked += 1;
    }

    Ok(marked)
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Invalid job id '{}': {}", id, e)))?;

    let state: String = row.try_get("state")?;
    let state: JobState = serde_json::from_str(&state)
        .map_err(|e| Error::Internal(format!("Failed to deserialize job state: {}", e)))?;

    let last_stage: Option<String> = row.try_get("last_stage")?;

    Ok(Job {
        id,
        input_kind: from_text(&row.try_get::<String, _>("input_kind")?)?,
        state,
        last_stage: last_stage.as_deref().map(from_text).transpose()?,
        created_at: parse_rfc3339(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_rfc3339(&row.try_get::<String, _>("updated_at")?)?,
    })
}

/// Unit enum → its serde name
fn to_text<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(Error::Internal(format!("Expected string enum, got {}", other))),
        Err(e) => Err(Error::Internal(format!("Failed to serialize enum: {}", e))),
    }
}

fn from_text<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|e| Error::Internal(format!("Unknown value '{}': {}", text, e)))
}
