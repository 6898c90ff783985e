//! Job journal
//!
//! Write-behind persistence for tracker transitions. The tracker hands each
//! snapshot over while it still holds its lock, so the single writer task
//! applies them in transition order.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::db::JobStore;
use crate::models::Job;

#[derive(Clone)]
pub struct JobJournal {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobJournal {
    /// Start the writer task; it exits once every journal handle is dropped
    pub fn spawn(store: Arc<dyn JobStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = store.save(&job).await {
                    warn!(job_id = %job.id, status = ?job.status(), "Failed to persist job record: {}", e);
                }
            }
            debug!("Job journal writer stopped");
        });

        Self { tx }
    }

    /// Queue a snapshot for persistence
    pub fn record(&self, job: &Job) {
        if self.tx.send(job.clone()).is_err() {
            warn!(job_id = %job.id, "Job journal writer is gone; record not persisted");
        }
    }
}
