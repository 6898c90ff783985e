//! Job API handlers
//!
//! POST /api/jobs, GET /api/jobs, GET /api/jobs/:id, POST /api/jobs/:id/cancel

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use songline_common::StageKind;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    FailureKind, InputKind, Job, JobFailure, JobOutcome, JobState, JobStatus, PipelineRequest,
};
use crate::services::TrackerError;
use crate::AppState;

/// Upper bound on records returned by GET /api/jobs
const JOB_LIST_LIMIT: usize = 200;

/// POST /api/jobs response
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Job snapshot as seen by polling clients
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub input_kind: InputKind,
    pub current_stage: Option<StageKind>,
    pub last_stage: Option<StageKind>,
    pub result_ref: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FailureResponse {
    pub stage: Option<StageKind>,
    pub kind: FailureKind,
    pub reason: String,
    /// Deployment fault (storage, database, restart) rather than a stage or request fault
    pub infrastructure: bool,
}

impl From<JobFailure> for FailureResponse {
    fn from(failure: JobFailure) -> Self {
        Self {
            stage: failure.stage,
            infrastructure: failure.kind.is_infrastructure(),
            kind: failure.kind,
            reason: failure.reason,
        }
    }
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let (outcome, failure) = match &job.state {
            JobState::Completed { outcome } => (Some(outcome.clone()), None),
            JobState::Failed { failure } => (None, Some(failure.clone().into())),
            _ => (None, None),
        };

        Self {
            job_id: job.id,
            status: job.status(),
            input_kind: job.input_kind,
            current_stage: job.current_stage(),
            last_stage: job.last_stage,
            result_ref: job.result_ref(),
            outcome,
            failure,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// POST /api/jobs
///
/// Validates and enqueues a pipeline request. Returns 202 Accepted with the job id.
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<PipelineRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let job_id = state.runner.submit(request)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// GET /api/jobs
///
/// Live jobs merged with recent history from the job store, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<JobResponse>>> {
    let mut jobs = state.runner.list();
    let live: HashSet<Uuid> = jobs.iter().map(|job| job.id).collect();

    let history = state.jobs.list_recent(JOB_LIST_LIMIT).await?;
    jobs.extend(history.into_iter().filter(|job| !live.contains(&job.id)));

    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    jobs.truncate(JOB_LIST_LIMIT);
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

/// GET /api/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    if let Some(job) = state.runner.status(job_id) {
        return Ok(Json(job.into()));
    }

    state
        .jobs
        .get(job_id)
        .await?
        .map(|job| Json(job.into()))
        .ok_or_else(|| ApiError::NotFound(format!("job {}", job_id)))
}

/// POST /api/jobs/:id/cancel
///
/// 409 Conflict if the job already finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    match state.runner.cancel(job_id) {
        Ok(job) => Ok(Json(job.into())),
        Err(TrackerError::NotFound(_)) => match state.jobs.get(job_id).await? {
            // Only finished jobs leave the runner
            Some(job) => Err(ApiError::Conflict(format!(
                "Job {} is already {}",
                job_id,
                job.status().as_str()
            ))),
            None => Err(ApiError::NotFound(format!("job {}", job_id))),
        },
        Err(e) => Err(e.into()),
    }
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", post(submit_job).get(list_jobs))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/jobs/:id/cancel", post(cancel_job))
}
