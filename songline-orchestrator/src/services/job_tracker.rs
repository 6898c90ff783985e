//! Job state tracker
//!
//! Owns the live [`Job`] records. Transitions are monotonic: once a job is
//! `Completed` or `Failed` every further transition is rejected. Readers get a
//! cloned snapshot taken under a short lock that is never held across `.await`.
//!
//! With a [`JobJournal`] attached every transition is also persisted, and
//! finished jobs beyond the retention limit are dropped from memory; they stay
//! readable through the job store.

use chrono::Utc;
use songline_common::events::{EventBus, PipelineEvent};
use songline_common::StageKind;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

use super::job_journal::JobJournal;
use crate::models::{InputKind, Job, JobFailure, JobOutcome, JobState, JobStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {job_id} is already {status:?}")]
    Terminal { job_id: Uuid, status: JobStatus },

    #[error("Job {job_id} cannot move from {from:?} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: &'static str,
    },
}

pub struct JobTracker {
    jobs: RwLock<HashMap<Uuid, Job>>,
    event_bus: EventBus,
    journal: Option<JobJournal>,
    /// Finished jobs kept in memory; `None` keeps all of them
    retain_finished: Option<usize>,
}

impl JobTracker {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            event_bus,
            journal: None,
            retain_finished: None,
        }
    }

    pub fn with_journal(mut self, journal: JobJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_retention(mut self, retain_finished: usize) -> Self {
        self.retain_finished = Some(retain_finished);
        self
    }

    /// Register a new queued job
    pub fn create(&self, input_kind: InputKind) -> Uuid {
        let job = Job::new(input_kind);
        let job_id = job.id;

        {
            let mut jobs = self.write_jobs();
            if let Some(journal) = &self.journal {
                journal.record(&job);
            }
            jobs.insert(job_id, job);
        }

        tracing::info!(job_id = %job_id, input_kind = ?input_kind, "Job queued");
        self.event_bus.emit_lossy(PipelineEvent::JobQueued {
            job_id,
            timestamp: Utc::now(),
        });
        job_id
    }

    /// `Queued → Running`
    pub fn start(&self, job_id: Uuid) -> Result<(), TrackerError> {
        self.transition(job_id, "running", |state| match state {
            JobState::Queued => Some(JobState::Running {
                current_stage: None,
            }),
            _ => None,
        })?;

        self.event_bus.emit_lossy(PipelineEvent::JobStarted {
            job_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record entry into `stage`
    pub fn advance(&self, job_id: Uuid, stage: StageKind) -> Result<(), TrackerError> {
        self.transition(job_id, "stage", |state| match state {
            JobState::Running { .. } => Some(JobState::Running {
                current_stage: Some(stage),
            }),
            _ => None,
        })?;

        tracing::info!(job_id = %job_id, stage = %stage, "Stage started");
        self.event_bus.emit_lossy(PipelineEvent::StageStarted {
            job_id,
            stage,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Publish a dedup hit; the state itself changes on completion
    pub fn note_duplicate(&self, job_id: Uuid, song_id: Uuid) {
        self.event_bus.emit_lossy(PipelineEvent::DuplicateDetected {
            job_id,
            song_id,
            timestamp: Utc::now(),
        });
    }

    /// `Running → Completed` with a song
    pub fn complete(
        &self,
        job_id: Uuid,
        song_id: Uuid,
        deduplicated: bool,
    ) -> Result<(), TrackerError> {
        self.finish(
            job_id,
            JobOutcome::Song {
                song_id,
                deduplicated,
            },
        )?;

        tracing::info!(job_id = %job_id, song_id = %song_id, deduplicated, "Job completed");
        self.event_bus.emit_lossy(PipelineEvent::JobCompleted {
            job_id,
            song_id: Some(song_id),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// `Running → Completed` for a metadata search with no match
    pub fn complete_not_found(&self, job_id: Uuid) -> Result<(), TrackerError> {
        self.finish(job_id, JobOutcome::NotFound)?;

        tracing::info!(job_id = %job_id, "Job completed: no matching song");
        self.event_bus.emit_lossy(PipelineEvent::JobCompleted {
            job_id,
            song_id: None,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Any non-terminal state → `Failed`
    pub fn fail(&self, job_id: Uuid, failure: JobFailure) -> Result<(), TrackerError> {
        let stage = failure.stage;
        let reason = failure.reason.clone();
        let kind = failure.kind;

        self.transition(job_id, "failed", move |_| {
            Some(JobState::Failed { failure })
        })?;

        tracing::warn!(
            job_id = %job_id,
            stage = ?stage,
            kind = ?kind,
            "Job failed: {}",
            reason
        );
        self.event_bus.emit_lossy(PipelineEvent::JobFailed {
            job_id,
            stage,
            reason,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Snapshot of one job
    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.read_jobs().get(&job_id).cloned()
    }

    /// Snapshots of all jobs, newest first
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.read_jobs().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Number of jobs not yet terminal
    pub fn active_count(&self) -> usize {
        self.read_jobs().values().filter(|j| !j.is_terminal()).count()
    }

    fn finish(&self, job_id: Uuid, outcome: JobOutcome) -> Result<(), TrackerError> {
        self.transition(job_id, "completed", move |state| match state {
            JobState::Running { .. } => Some(JobState::Completed { outcome }),
            _ => None,
        })
    }

    /// Apply `next` under the write lock; terminal jobs are never touched
    fn transition<F>(&self, job_id: Uuid, to: &'static str, next: F) -> Result<(), TrackerError>
    where
        F: FnOnce(&JobState) -> Option<JobState>,
    {
        let mut jobs = self.write_jobs();
        let job = jobs.get_mut(&job_id).ok_or(TrackerError::NotFound(job_id))?;

        if job.is_terminal() {
            let err = TrackerError::Terminal {
                job_id,
                status: job.status(),
            };
            tracing::warn!(job_id = %job_id, to, "Rejected transition on terminal job");
            return Err(err);
        }

        let Some(state) = next(&job.state) else {
            return Err(TrackerError::InvalidTransition {
                job_id,
                from: job.status(),
                to,
            });
        };
        job.transition_to(state);
        if let Some(journal) = &self.journal {
            journal.record(job);
        }

        if job.is_terminal() {
            self.evict_finished(&mut jobs);
        }
        Ok(())
    }

    /// Drop the oldest finished jobs beyond the retention limit
    fn evict_finished(&self, jobs: &mut HashMap<Uuid, Job>) {
        let Some(limit) = self.retain_finished else {
            return;
        };

        let mut finished: Vec<_> = jobs
            .values()
            .filter(|job| job.is_terminal())
            .map(|job| (job.updated_at, job.id))
            .collect();
        if finished.len() <= limit {
            return;
        }

        finished.sort();
        let excess = finished.len() - limit;
        for (_, job_id) in finished.into_iter().take(excess) {
            jobs.remove(&job_id);
        }
        tracing::debug!(evicted = excess, "Evicted finished jobs from memory");
    }

    fn read_jobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_jobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureKind;
    use std::sync::Arc;

    fn tracker() -> JobTracker {
        JobTracker::new(EventBus::new(64))
    }

    #[test]
    fn test_happy_path_transitions() {
        let tracker = tracker();
        let id = tracker.create(InputKind::Audio);
        assert_eq!(tracker.get(id).unwrap().status(), JobStatus::Queued);

        tracker.start(id).unwrap();
        tracker.advance(id, StageKind::Identify).unwrap();
        tracker.advance(id, StageKind::Separate).unwrap();
        assert_eq!(tracker.get(id).unwrap().current_stage(), Some(StageKind::Separate));

        let song_id = Uuid::new_v4();
        tracker.complete(id, song_id, false).unwrap();

        let job = tracker.get(id).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.result_ref(), Some(song_id));
        assert_eq!(job.last_stage, Some(StageKind::Separate));
    }

    #[test]
    fn test_terminal_jobs_reject_transitions() {
        let tracker = tracker();
        let id = tracker.create(InputKind::Text);
        tracker.start(id).unwrap();
        tracker.complete_not_found(id).unwrap();

        assert!(matches!(
            tracker.advance(id, StageKind::Classify),
            Err(TrackerError::Terminal { .. })
        ));
        assert!(matches!(
            tracker.fail(
                id,
                JobFailure {
                    stage: None,
                    kind: FailureKind::Cancelled,
                    reason: "late".to_string()
                }
            ),
            Err(TrackerError::Terminal { .. })
        ));
        assert_eq!(tracker.get(id).unwrap().status(), JobStatus::Completed);
    }

    #[test]
    fn test_queued_job_cannot_complete_or_advance() {
        let tracker = tracker();
        let id = tracker.create(InputKind::Audio);

        assert!(matches!(
            tracker.advance(id, StageKind::Identify),
            Err(TrackerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            tracker.complete(id, Uuid::new_v4(), false),
            Err(TrackerError::InvalidTransition { .. })
        ));
        assert!(matches!(tracker.start(Uuid::new_v4()), Err(TrackerError::NotFound(_))));
    }

    #[test]
    fn test_queued_job_can_fail() {
        let tracker = tracker();
        let id = tracker.create(InputKind::Audio);
        tracker
            .fail(
                id,
                JobFailure {
                    stage: None,
                    kind: FailureKind::Cancelled,
                    reason: "Job cancelled".to_string(),
                },
            )
            .unwrap();
        assert_eq!(tracker.get(id).unwrap().status(), JobStatus::Failed);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_transitions_are_published() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let tracker = JobTracker::new(bus);

        let id = tracker.create(InputKind::Audio);
        tracker.start(id).unwrap();
        tracker.advance(id, StageKind::Identify).unwrap();

        let types: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(types, vec!["JobQueued", "JobStarted", "StageStarted"]);
    }

    #[test]
    fn test_finished_jobs_beyond_retention_are_evicted() {
        let tracker = tracker().with_retention(2);
        let active = tracker.create(InputKind::Audio);
        tracker.start(active).unwrap();

        let mut finished = Vec::new();
        for _ in 0..5 {
            let id = tracker.create(InputKind::Text);
            tracker.start(id).unwrap();
            tracker.complete_not_found(id).unwrap();
            finished.push(id);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        assert_eq!(tracker.list().len(), 3);
        assert!(tracker.get(active).is_some());
        assert!(tracker.get(finished[0]).is_none());
        assert!(tracker.get(finished[2]).is_none());
        assert!(tracker.get(finished[3]).is_some());
        assert!(tracker.get(finished[4]).is_some());
    }

    #[tokio::test]
    async fn test_transitions_reach_the_journal() {
        use crate::db::{init_database_pool, JobStore, SqliteJobStore};

        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("tracker.db")).await.unwrap();
        let store = Arc::new(SqliteJobStore::new(pool));
        let tracker = tracker()
            .with_journal(JobJournal::spawn(store.clone()))
            .with_retention(0);

        let id = tracker.create(InputKind::Audio);
        tracker.start(id).unwrap();
        tracker.advance(id, StageKind::Identify).unwrap();
        tracker.complete(id, Uuid::new_v4(), true).unwrap();
        assert!(tracker.get(id).is_none(), "evicted once finished");

        let mut stored = None;
        for _ in 0..200 {
            stored = store.get(id).await.unwrap();
            if stored.as_ref().is_some_and(|job| job.is_terminal()) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let stored = stored.expect("job persisted");
        assert_eq!(stored.status(), JobStatus::Completed);
        assert_eq!(stored.last_stage, Some(StageKind::Identify));
    }

    #[test]
    fn test_list_is_newest_first() {
        let tracker = tracker();
        let first = tracker.create(InputKind::Audio);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = tracker.create(InputKind::Text);

        let ids: Vec<Uuid> = tracker.list().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second, first]);
    }
}
