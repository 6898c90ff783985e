//! Orchestration services
//!
//! Leaves first: the stage client and synchronizer talk to the outside world,
//! the dedup gate and persister talk to the song store, the tracker owns job
//! state and journals it to the job store, and the runner ties them together.

pub mod dedup_gate;
pub mod job_journal;
pub mod job_runner;
pub mod job_tracker;
pub mod result_persister;
pub mod stage_client;
pub mod synchronizer;

pub use dedup_gate::{DedupGate, DedupLookup};
pub use job_journal::JobJournal;
pub use job_runner::JobRunner;
pub use job_tracker::{JobTracker, TrackerError};
pub use result_persister::{CommitTicket, Committed, ResultPersister};
pub use stage_client::{HttpStageClient, StageError, StageService};
pub use synchronizer::{ArtifactWaiter, PollingWaiter, SharedStorage, SyncError};
