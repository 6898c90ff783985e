//! Job runner
//!
//! Job-facing façade: validates a request, creates its job, and executes the
//! plan on a background task under a global concurrency limit. Every spawned
//! job ends `Completed` or `Failed`.

use songline_common::StageKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job_tracker::{JobTracker, TrackerError};
use crate::models::{FailureKind, Job, JobFailure, PipelineRequest};
use crate::pipeline::{Composer, PipelineError, PipelineOutcome, PipelinePlan, StageObserver};

/// Forwards composer progress into the tracker
struct TrackerObserver<'a> {
    tracker: &'a JobTracker,
    job_id: Uuid,
}

impl StageObserver for TrackerObserver<'_> {
    fn stage_started(&self, stage: StageKind) {
        if let Err(e) = self.tracker.advance(self.job_id, stage) {
            warn!(job_id = %self.job_id, stage = %stage, "Could not record stage: {}", e);
        }
    }

    fn duplicate_detected(&self, song_id: Uuid) {
        self.tracker.note_duplicate(self.job_id, song_id);
    }
}

#[derive(Clone)]
pub struct JobRunner {
    tracker: Arc<JobTracker>,
    composer: Arc<Composer>,
    permits: Arc<Semaphore>,
    cancellation_tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl JobRunner {
    pub fn new(tracker: Arc<JobTracker>, composer: Arc<Composer>, max_concurrent_jobs: usize) -> Self {
        Self {
            tracker,
            composer,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            cancellation_tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Validate and enqueue a request; returns immediately
    ///
    /// Invalid requests are rejected without creating a job.
    pub fn submit(&self, request: PipelineRequest) -> Result<Uuid, PipelineError> {
        let plan = PipelinePlan::resolve(&request)?;
        let job_id = self.tracker.create(request.input_kind());

        let cancel = CancellationToken::new();
        self.tokens().insert(job_id, cancel.clone());

        let runner = self.clone();
        tokio::spawn(async move {
            runner.run(job_id, plan, cancel).await;
        });

        Ok(job_id)
    }

    /// Request cancellation of a queued or running job
    ///
    /// The job reaches `Failed(Cancelled)` once its task observes the token.
    pub fn cancel(&self, job_id: Uuid) -> Result<Job, TrackerError> {
        let job = self.tracker.get(job_id).ok_or(TrackerError::NotFound(job_id))?;
        if job.is_terminal() {
            return Err(TrackerError::Terminal {
                job_id,
                status: job.status(),
            });
        }

        if let Some(token) = self.tokens().get(&job_id) {
            info!(job_id = %job_id, "Cancellation requested");
            token.cancel();
        }
        Ok(job)
    }

    /// Non-blocking snapshot
    pub fn status(&self, job_id: Uuid) -> Option<Job> {
        self.tracker.get(job_id)
    }

    pub fn list(&self) -> Vec<Job> {
        self.tracker.list()
    }

    async fn run(&self, job_id: Uuid, plan: PipelinePlan, cancel: CancellationToken) {
        let permit = tokio::select! {
            _ = cancel.cancelled() => None,
            permit = self.permits.clone().acquire_owned() => permit.ok(),
        };

        match permit {
            Some(_permit) => {
                if let Err(e) = self.tracker.start(job_id) {
                    warn!(job_id = %job_id, "Could not start job: {}", e);
                } else {
                    let observer = TrackerObserver {
                        tracker: &self.tracker,
                        job_id,
                    };
                    let result = self.composer.execute(job_id, &plan, &observer, &cancel).await;
                    self.record(job_id, result);
                }
            }
            None => {
                debug!(job_id = %job_id, "Cancelled before execution slot was available");
                self.record_failure(
                    job_id,
                    JobFailure {
                        stage: None,
                        kind: FailureKind::Cancelled,
                        reason: "Job cancelled".to_string(),
                    },
                );
            }
        }

        self.tokens().remove(&job_id);
    }

    fn record(&self, job_id: Uuid, result: Result<PipelineOutcome, PipelineError>) {
        let recorded = match result {
            Ok(PipelineOutcome::Persisted { song, adopted }) => {
                self.tracker.complete(job_id, song.id, adopted)
            }
            Ok(PipelineOutcome::Deduplicated(song)) => self.tracker.complete(job_id, song.id, true),
            Ok(PipelineOutcome::Found(song)) => self.tracker.complete(job_id, song.id, false),
            Ok(PipelineOutcome::NotFound) => self.tracker.complete_not_found(job_id),
            Err(e) => {
                if let PipelineError::Persistence(ref source) = e {
                    error!(job_id = %job_id, "Persisting result failed: {}", source);
                } else {
                    debug!(job_id = %job_id, "Pipeline stopped: {}", e);
                }
                self.tracker.fail(job_id, e.failure())
            }
        };

        if let Err(e) = recorded {
            warn!(job_id = %job_id, "Could not record job outcome: {}", e);
        }
    }

    fn record_failure(&self, job_id: Uuid, failure: JobFailure) {
        if let Err(e) = self.tracker.fail(job_id, failure) {
            warn!(job_id = %job_id, "Could not record job failure: {}", e);
        }
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.cancellation_tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
