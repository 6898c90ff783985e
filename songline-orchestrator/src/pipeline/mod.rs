//! Pipeline planning and execution
//!
//! [`plan`] turns a request into the ordered stage list; [`composer`] runs it.

pub mod composer;
pub mod plan;

pub use composer::{Composer, ComposerSettings, PipelineOutcome, StageObserver};
pub use plan::{stages_between, PipelinePlan};

use songline_common::StageKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::{FailureKind, JobFailure};
use crate::services::stage_client::StageError;

/// Everything that can stop a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Request rejected before any job exists
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{} stage failed: {fault}", .stage.label())]
    StageFault {
        stage: StageKind,
        #[source]
        fault: StageError,
    },

    /// Expected artifact never became visible in shared storage
    #[error("{} stage: {} not visible after {waited:?}", .stage.label(), .path.display())]
    SynchronizationTimeout {
        stage: StageKind,
        path: PathBuf,
        waited: Duration,
    },

    #[error("Job cancelled")]
    Cancelled { stage: Option<StageKind> },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] songline_common::Error),
}

impl PipelineError {
    /// Stage the error is attributed to, if any
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            PipelineError::StageFault { stage, .. }
            | PipelineError::SynchronizationTimeout { stage, .. } => Some(*stage),
            PipelineError::Cancelled { stage } => *stage,
            PipelineError::Validation(_) | PipelineError::Persistence(_) => None,
        }
    }

    /// Classify into the failure recorded on the job
    ///
    /// The reason is what polling clients see; transport details stay in logs.
    pub fn failure(&self) -> JobFailure {
        let stage = self.stage();
        let (kind, reason) = match self {
            PipelineError::Validation(msg) => {
                (FailureKind::StageFault, format!("Invalid request: {}", msg))
            }
            PipelineError::StageFault { stage, fault } => (
                FailureKind::StageFault,
                format!("{} stage failed: {}", stage.label(), fault.summary()),
            ),
            PipelineError::SynchronizationTimeout { stage, waited, .. } => (
                FailureKind::SynchronizationTimeout,
                format!(
                    "{} stage failed: artifact not available after {:.1}s",
                    stage.label(),
                    waited.as_secs_f64()
                ),
            ),
            PipelineError::Cancelled { .. } => {
                (FailureKind::Cancelled, "Job cancelled".to_string())
            }
            PipelineError::Persistence(_) => {
                (FailureKind::Persistence, "Failed to save result".to_string())
            }
        };

        JobFailure {
            stage,
            kind,
            reason,
        }
    }
}
