//! Data models for songline-orchestrator

pub mod artifact;
pub mod job;
pub mod request;
pub mod song;

pub use artifact::{
    ArtifactBundle, CandidateMatch, Classification, Identification, Transcription, VocalStem,
};
pub use job::{FailureKind, Job, JobFailure, JobOutcome, JobState, JobStatus};
pub use request::{InputKind, PipelineInput, PipelineRequest, StartPoint};
pub use song::Song;
pub use songline_common::StageKind;
