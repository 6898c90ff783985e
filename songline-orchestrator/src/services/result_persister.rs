//! Result persister
//!
//! Commits the final song of a job exactly once. Racing jobs with the same
//! fingerprint are resolved by the store's insert-or-adopt: the loser gets the
//! winner's row back and reports `adopted`.

use songline_common::Result;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::SongStore;
use crate::models::{ArtifactBundle, Song};

/// Right to commit one result for one job
///
/// Issued once per run and consumed by [`ResultPersister::commit`], so a run
/// cannot commit twice and nothing outlives the run.
///
/// ```compile_fail
/// use songline_orchestrator::models::ArtifactBundle;
/// use songline_orchestrator::services::ResultPersister;
///
/// async fn commit_twice(persister: &ResultPersister, job_id: uuid::Uuid) {
///     let ticket = persister.ticket(job_id);
///     let _ = persister.commit(ticket, ArtifactBundle::default()).await;
///     let _ = persister.commit(ticket, ArtifactBundle::default()).await;
/// }
/// ```
#[derive(Debug)]
pub struct CommitTicket {
    job_id: Uuid,
}

impl CommitTicket {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }
}

/// Outcome of a commit
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub song: Song,
    /// Another job already persisted this fingerprint; `song` is its record
    pub adopted: bool,
}

pub struct ResultPersister {
    store: Arc<dyn SongStore>,
}

impl ResultPersister {
    pub fn new(store: Arc<dyn SongStore>) -> Self {
        Self { store }
    }

    pub fn ticket(&self, job_id: Uuid) -> CommitTicket {
        CommitTicket { job_id }
    }

    pub async fn commit(&self, ticket: CommitTicket, bundle: ArtifactBundle) -> Result<Committed> {
        let job_id = ticket.job_id;
        let candidate = Song::from_bundle(bundle);
        let stored = self.store.insert_or_get_by_fingerprint(&candidate).await?;

        let adopted = stored.id != candidate.id;
        if adopted {
            tracing::info!(
                job_id = %job_id,
                song_id = %stored.id,
                "Fingerprint committed concurrently by another job; adopting existing song"
            );
        } else {
            tracing::info!(job_id = %job_id, song_id = %stored.id, "Song persisted");
        }

        Ok(Committed {
            song: stored,
            adopted,
        })
    }
}
