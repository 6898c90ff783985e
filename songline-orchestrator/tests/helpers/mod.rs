//! Test helper utilities
//!
//! Shared harness for songline-orchestrator integration tests: a temp shared
//! directory, a temp SQLite database and a scripted in-process stage service.

#![allow(dead_code)]

use async_trait::async_trait;
use songline_common::events::EventBus;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Barrier;
use uuid::Uuid;

use songline_orchestrator::db::{init_database_pool, JobStore, SqliteJobStore, SqliteSongStore};
use songline_orchestrator::models::{
    CandidateMatch, Classification, Identification, Job, Transcription,
};
use songline_orchestrator::pipeline::{Composer, ComposerSettings};
use songline_orchestrator::services::{
    JobJournal, JobRunner, JobTracker, PollingWaiter, SharedStorage, StageError, StageService,
};
use songline_orchestrator::AppState;

/// Per-stage call counters
#[derive(Debug, Default)]
pub struct CallCounts {
    pub identify: AtomicUsize,
    pub convert: AtomicUsize,
    pub separate: AtomicUsize,
    pub transcribe: AtomicUsize,
    pub classify: AtomicUsize,
}

impl CallCounts {
    pub fn get(&self) -> [usize; 5] {
        [
            self.identify.load(Ordering::SeqCst),
            self.convert.load(Ordering::SeqCst),
            self.separate.load(Ordering::SeqCst),
            self.transcribe.load(Ordering::SeqCst),
            self.classify.load(Ordering::SeqCst),
        ]
    }
}

/// Scripted stage service operating on a real shared directory
///
/// Identify derives the fingerprint from the staged file's bytes, so identical
/// uploads produce identical fingerprints.
pub struct FakeStages {
    pub storage: SharedStorage,
    pub matches: Vec<CandidateMatch>,
    pub lyrics: String,
    pub label: String,
    pub confidence: f64,
    /// Separate reports success but never writes the stem
    pub drop_stems: bool,
    pub fail_convert: bool,
    /// Convert reports this file name instead of writing `<stem>.wav`
    pub convert_to: Option<String>,
    pub fail_transcribe: bool,
    /// Every identify call waits here before returning
    pub identify_barrier: Option<Arc<Barrier>>,
    pub calls: CallCounts,
}

impl FakeStages {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            matches: Vec::new(),
            lyrics: "we sang all night".to_string(),
            label: "Human".to_string(),
            confidence: 0.87,
            drop_stems: false,
            fail_convert: false,
            convert_to: None,
            fail_transcribe: false,
            identify_barrier: None,
            calls: CallCounts::default(),
        }
    }
}

#[async_trait]
impl StageService for FakeStages {
    async fn identify(&self, locator: &str) -> Result<Identification, StageError> {
        self.calls.identify.fetch_add(1, Ordering::SeqCst);
        let bytes = tokio::fs::read(self.storage.input_path(locator))
            .await
            .map_err(|e| StageError::Rejected(e.to_string()))?;

        if let Some(barrier) = &self.identify_barrier {
            barrier.wait().await;
        }

        Ok(Identification {
            fingerprint: format!("FP:{}", String::from_utf8_lossy(&bytes)),
            duration_seconds: 187.0,
            candidate_matches: self.matches.clone(),
        })
    }

    async fn convert(&self, locator: &str) -> Result<String, StageError> {
        self.calls.convert.fetch_add(1, Ordering::SeqCst);
        if self.fail_convert {
            return Err(StageError::Rejected("ffmpeg exited with status 1".to_string()));
        }
        if let Some(name) = &self.convert_to {
            return Ok(name.clone());
        }
        let stem = Path::new(locator)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(locator);
        let converted = format!("{}.wav", stem);
        tokio::fs::copy(
            self.storage.input_path(locator),
            self.storage.input_path(&converted),
        )
        .await
        .map_err(|e| StageError::Rejected(e.to_string()))?;
        Ok(converted)
    }

    async fn separate(&self, locator: &str) -> Result<(), StageError> {
        self.calls.separate.fetch_add(1, Ordering::SeqCst);
        if !self.drop_stems {
            tokio::fs::copy(
                self.storage.input_path(locator),
                self.storage.vocal_stem_path(locator),
            )
            .await
            .map_err(|e| StageError::Rejected(e.to_string()))?;
        }
        Ok(())
    }

    async fn transcribe(&self, _stem_name: &str) -> Result<Transcription, StageError> {
        self.calls.transcribe.fetch_add(1, Ordering::SeqCst);
        if self.fail_transcribe {
            return Err(StageError::Transport(
                "error sending request: connection refused".to_string(),
            ));
        }
        Ok(Transcription {
            lyrics: self.lyrics.clone(),
        })
    }

    async fn classify(&self, _lyrics: &str) -> Result<Classification, StageError> {
        self.calls.classify.fetch_add(1, Ordering::SeqCst);
        Ok(Classification {
            label: self.label.clone(),
            confidence: self.confidence,
        })
    }
}

/// Everything a pipeline test needs, wired like `main` does it
pub struct Harness {
    pub dir: TempDir,
    pub storage: SharedStorage,
    pub pool: sqlx::SqlitePool,
    pub songs: Arc<SqliteSongStore>,
    pub jobs: Arc<SqliteJobStore>,
    pub stages: Arc<FakeStages>,
    pub event_bus: EventBus,
    pub runner: JobRunner,
}

pub struct HarnessOptions {
    pub sync_timeout: Duration,
    pub max_concurrent_jobs: usize,
    pub convert_non_wav: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(2),
            max_concurrent_jobs: 4,
            convert_non_wav: true,
        }
    }
}

/// Temp directory with an initialized shared layout
pub fn shared_dir() -> (TempDir, SharedStorage) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let storage = SharedStorage::new(dir.path().join("shared"));
    storage.ensure_layout().expect("Failed to create shared layout");
    (dir, storage)
}

pub async fn harness_with<F>(options: HarnessOptions, configure: F) -> Harness
where
    F: FnOnce(&mut FakeStages),
{
    let (dir, storage) = shared_dir();
    let pool = init_database_pool(&dir.path().join("songline.db"))
        .await
        .expect("Failed to init database");
    let songs = Arc::new(SqliteSongStore::new(pool.clone()));
    let jobs = Arc::new(SqliteJobStore::new(pool.clone()));

    let mut fake = FakeStages::new(storage.clone());
    configure(&mut fake);
    let stages = Arc::new(fake);

    let composer = Composer::new(
        stages.clone(),
        Arc::new(PollingWaiter::new(Duration::from_millis(10))),
        storage.clone(),
        songs.clone(),
        ComposerSettings {
            sync_timeout: options.sync_timeout,
            convert_non_wav: options.convert_non_wav,
        },
    );

    let event_bus = EventBus::new(256);
    let tracker = Arc::new(
        JobTracker::new(event_bus.clone()).with_journal(JobJournal::spawn(jobs.clone())),
    );
    let runner = JobRunner::new(tracker, Arc::new(composer), options.max_concurrent_jobs);

    Harness {
        dir,
        storage,
        pool,
        songs,
        jobs,
        stages,
        event_bus,
        runner,
    }
}

pub async fn harness() -> Harness {
    harness_with(HarnessOptions::default(), |_| {}).await
}

impl Harness {
    /// Write an "uploaded" file into the shared root
    pub fn stage_audio(&self, name: &str, content: &str) -> String {
        std::fs::write(self.storage.input_path(name), content).expect("Failed to stage audio");
        name.to_string()
    }

    pub fn input_path(&self, name: &str) -> PathBuf {
        self.storage.input_path(name)
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.runner.clone(),
            self.songs.clone(),
            self.jobs.clone(),
            self.storage.clone(),
            self.event_bus.clone(),
        )
    }

    pub async fn song_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM songs")
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count songs")
    }

    /// Poll the job store until the persisted record is terminal (10s cap)
    pub async fn wait_persisted(&self, job_id: Uuid) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let stored = self.jobs.get(job_id).await.expect("Failed to load job");
            if let Some(job) = stored.filter(|job| job.is_terminal()) {
                return job;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("job {} never persisted a terminal record", job_id);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the job is terminal (10s cap)
    pub async fn wait_terminal(&self, job_id: Uuid) -> Job {
        wait_for(&self.runner, job_id, |job| job.is_terminal()).await
    }
}

/// Poll a job until `predicate` holds (10s cap)
pub async fn wait_for<P>(runner: &JobRunner, job_id: Uuid, predicate: P) -> Job
where
    P: Fn(&Job) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = runner.status(job_id).expect("job should exist");
        if predicate(&job) {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for job {}: {:?}", job_id, job.state);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
