//! Job lifecycle state machine
//!
//! `Queued → Running → (current stage updated per stage) → Completed | Failed`
//!
//! Terminal data lives inside the state variant, so a snapshot can never show
//! `Completed` without its outcome or `Failed` without its failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use songline_common::StageKind;
use uuid::Uuid;

use super::InputKind;

/// Flat status discriminant, as shown to polling clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// How a completed job ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    /// A song record was produced, found by dedup, or found by metadata search
    Song { song_id: Uuid, deduplicated: bool },
    /// Metadata search found nothing; a normal outcome, not a failure
    NotFound,
}

/// Classification of a job failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A stage service returned an error or a malformed payload
    StageFault,
    /// An expected artifact never became visible (infrastructure fault)
    SynchronizationTimeout,
    /// The job was cancelled while in flight
    Cancelled,
    /// The result could not be persisted
    Persistence,
    /// The process stopped while the job was queued or running
    Interrupted,
}

impl FailureKind {
    /// Faults of the deployment rather than of a stage service or the caller
    pub fn is_infrastructure(self) -> bool {
        matches!(
            self,
            FailureKind::SynchronizationTimeout | FailureKind::Persistence | FailureKind::Interrupted
        )
    }
}

/// Failure details recorded on a failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub stage: Option<StageKind>,
    pub kind: FailureKind,
    /// Human-readable reason, never a raw transport error
    pub reason: String,
}

/// Lifecycle state with per-state data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running { current_stage: Option<StageKind> },
    Completed { outcome: JobOutcome },
    Failed { failure: JobFailure },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Queued => JobStatus::Queued,
            JobState::Running { .. } => JobStatus::Running,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

/// Tracked lifecycle of one pipeline execution request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub input_kind: InputKind,
    pub state: JobState,
    /// Last stage entered; kept after completion or failure for display
    pub last_stage: Option<StageKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(input_kind: InputKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            input_kind,
            state: JobState::Queued,
            last_stage: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Stage currently executing (only while running)
    pub fn current_stage(&self) -> Option<StageKind> {
        match &self.state {
            JobState::Running { current_stage } => *current_stage,
            _ => None,
        }
    }

    /// Song produced or resolved by this job (only when completed)
    pub fn result_ref(&self) -> Option<Uuid> {
        match &self.state {
            JobState::Completed {
                outcome: JobOutcome::Song { song_id, .. },
            } => Some(*song_id),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.state {
            JobState::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    /// Replace the state; callers enforce monotonicity
    pub(crate) fn transition_to(&mut self, state: JobState) {
        if let JobState::Running {
            current_stage: Some(stage),
        } = &state
        {
            self.last_stage = Some(*stage);
        }
        self.state = state;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_queued() {
        let job = Job::new(InputKind::Audio);
        assert_eq!(job.status(), JobStatus::Queued);
        assert!(!job.is_terminal());
        assert!(job.current_stage().is_none());
        assert!(job.result_ref().is_none());
    }

    #[test]
    fn test_accessors_follow_state() {
        let mut job = Job::new(InputKind::Audio);
        job.transition_to(JobState::Running {
            current_stage: Some(StageKind::Separate),
        });
        assert_eq!(job.current_stage(), Some(StageKind::Separate));
        assert_eq!(job.last_stage, Some(StageKind::Separate));

        let song_id = Uuid::new_v4();
        job.transition_to(JobState::Completed {
            outcome: JobOutcome::Song {
                song_id,
                deduplicated: false,
            },
        });
        assert!(job.is_terminal());
        assert_eq!(job.result_ref(), Some(song_id));
        assert!(job.current_stage().is_none());
        assert_eq!(job.last_stage, Some(StageKind::Separate));
    }

    #[test]
    fn test_state_serializes_with_status_tag() {
        let state = JobState::Failed {
            failure: JobFailure {
                stage: Some(StageKind::Transcribe),
                kind: FailureKind::StageFault,
                reason: "Transcribe stage failed".to_string(),
            },
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["failure"]["stage"], "transcribe");
        assert_eq!(json["failure"]["kind"], "stage_fault");
    }

    #[test]
    fn test_infrastructure_kinds() {
        assert!(FailureKind::SynchronizationTimeout.is_infrastructure());
        assert!(!FailureKind::StageFault.is_infrastructure());
        assert!(!FailureKind::Cancelled.is_infrastructure());
        assert!(FailureKind::Interrupted.is_infrastructure());
    }

    #[test]
    fn test_status_str_matches_serde() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(serde_json::to_value(status).unwrap(), status.as_str());
        }
    }
}
