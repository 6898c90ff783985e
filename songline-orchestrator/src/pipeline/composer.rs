//! Pipeline composer
//!
//! Executes a resolved [`PipelinePlan`] strictly sequentially, threading each
//! stage's artifact into the next. Nothing is persisted unless every planned
//! stage succeeds.

use songline_common::StageKind;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{PipelineError, PipelinePlan};
use crate::db::SongStore;
use crate::models::{ArtifactBundle, PipelineInput, Song, StartPoint, VocalStem};
use crate::services::dedup_gate::{DedupGate, DedupLookup};
use crate::services::result_persister::{CommitTicket, ResultPersister};
use crate::services::stage_client::{StageError, StageService};
use crate::services::synchronizer::{validate_locator, ArtifactWaiter, SharedStorage, SyncError};

/// How a successful run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// A new song was committed, or a concurrent job's song was adopted
    Persisted { song: Song, adopted: bool },
    /// Identify found an already-persisted fingerprint
    Deduplicated(Song),
    /// Metadata search hit
    Found(Song),
    /// Metadata search miss
    NotFound,
}

/// Receives progress notifications while a plan executes
pub trait StageObserver: Send + Sync {
    fn stage_started(&self, stage: StageKind);

    fn duplicate_detected(&self, _song_id: Uuid) {}
}

#[derive(Debug, Clone)]
pub struct ComposerSettings {
    pub sync_timeout: Duration,
    pub convert_non_wav: bool,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(10),
            convert_non_wav: true,
        }
    }
}

pub struct Composer {
    stages: Arc<dyn StageService>,
    waiter: Arc<dyn ArtifactWaiter>,
    storage: SharedStorage,
    store: Arc<dyn SongStore>,
    dedup: DedupGate,
    persister: ResultPersister,
    settings: ComposerSettings,
}

/// Mutable state of one run
struct RunState<'a> {
    job_id: Uuid,
    observer: &'a dyn StageObserver,
    cancel: &'a CancellationToken,
    ticket: CommitTicket,
    bundle: ArtifactBundle,
    /// Current audio file name in the shared root
    locator: Option<String>,
    stem: Option<VocalStem>,
}

impl Composer {
    pub fn new(
        stages: Arc<dyn StageService>,
        waiter: Arc<dyn ArtifactWaiter>,
        storage: SharedStorage,
        store: Arc<dyn SongStore>,
        settings: ComposerSettings,
    ) -> Self {
        Self {
            stages,
            waiter,
            storage,
            dedup: DedupGate::new(store.clone()),
            persister: ResultPersister::new(store.clone()),
            store,
            settings,
        }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub async fn execute(
        &self,
        job_id: Uuid,
        plan: &PipelinePlan,
        observer: &dyn StageObserver,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        debug!(job_id = %job_id, stages = ?plan.stages, "Executing plan");

        let mut run = RunState {
            job_id,
            observer,
            cancel,
            ticket: self.persister.ticket(job_id),
            bundle: ArtifactBundle::default(),
            locator: None,
            stem: None,
        };

        match &plan.input {
            PipelineInput::SearchByMetadata { title, artist } => {
                return self.search(job_id, title, artist).await;
            }
            PipelineInput::Text { lyrics } => {
                run.bundle.lyrics = Some(lyrics.clone());
            }
            PipelineInput::Audio {
                locator,
                title,
                artist,
            } => {
                run.bundle.title = title.clone();
                run.bundle.artist = artist.clone();
                if plan.start == StartPoint::Stage(StageKind::Separate) {
                    // Locator already names an isolated vocal stem
                    run.stem = Some(VocalStem {
                        stem_name: locator.clone(),
                        path: self.storage.vocal_stem_path(locator),
                    });
                } else {
                    run.locator = Some(locator.clone());
                }
                run.bundle.source_artifact_ref = Some(locator.clone());
            }
        }

        for &stage in &plan.stages {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled { stage: Some(stage) });
            }
            observer.stage_started(stage);

            match stage {
                StageKind::Identify => {
                    if let Some(song) = self.run_identify(&mut run).await? {
                        return Ok(PipelineOutcome::Deduplicated(song));
                    }
                }
                StageKind::Separate => self.run_separate(&mut run).await?,
                StageKind::Transcribe => self.run_transcribe(&mut run).await?,
                StageKind::Classify => self.run_classify(&mut run).await?,
            }
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { stage: None });
        }

        let committed = self.persister.commit(run.ticket, run.bundle).await?;
        if committed.adopted {
            // The adopted song references the other job's files
            if let Some(locator) = &run.locator {
                self.storage.discard(&self.storage.input_path(locator)).await;
            }
            if let Some(stem) = &run.stem {
                if plan.runs(StageKind::Separate) {
                    self.storage.discard(&stem.path).await;
                }
            }
        }

        Ok(PipelineOutcome::Persisted {
            song: committed.song,
            adopted: committed.adopted,
        })
    }

    async fn search(
        &self,
        job_id: Uuid,
        title: &str,
        artist: &str,
    ) -> Result<PipelineOutcome, PipelineError> {
        match self.store.get_by_title_artist(title, artist).await? {
            Some(song) => {
                info!(job_id = %job_id, song_id = %song.id, "Metadata search matched");
                Ok(PipelineOutcome::Found(song))
            }
            None => {
                info!(job_id = %job_id, title, artist, "Metadata search found nothing");
                Ok(PipelineOutcome::NotFound)
            }
        }
    }

    /// Returns the existing song on a dedup hit
    async fn run_identify(&self, run: &mut RunState<'_>) -> Result<Option<Song>, PipelineError> {
        let stage = StageKind::Identify;
        let mut locator = self.current_locator(run, stage)?;
        self.wait_visible(stage, &self.storage.input_path(&locator), run.cancel)
            .await?;

        if self.settings.convert_non_wav && !is_wav(&locator) {
            let converted = self
                .call(stage, run.cancel, self.stages.convert(&locator))
                .await?;
            validate_locator(&converted).map_err(|reason| {
                warn!(job_id = %run.job_id, converted = %converted, "Convert returned unusable file name");
                PipelineError::StageFault {
                    stage,
                    fault: StageError::Malformed(format!("converted file name: {}", reason)),
                }
            })?;
            self.wait_visible(stage, &self.storage.input_path(&converted), run.cancel)
                .await?;
            if converted != locator {
                self.storage.discard(&self.storage.input_path(&locator)).await;
            }
            debug!(job_id = %run.job_id, from = %locator, to = %converted, "Converted input");
            locator = converted;
            run.locator = Some(locator.clone());
            run.bundle.source_artifact_ref = Some(locator.clone());
        }

        let identification = self
            .call(stage, run.cancel, self.stages.identify(&locator))
            .await?;
        run.bundle.apply_identification(&identification);
        info!(
            job_id = %run.job_id,
            title = run.bundle.title.as_deref().unwrap_or_default(),
            artist = run.bundle.artist.as_deref().unwrap_or_default(),
            candidates = identification.candidate_matches.len(),
            "Identified"
        );

        match self.dedup.lookup(&identification.fingerprint).await? {
            DedupLookup::Hit(song) => {
                info!(job_id = %run.job_id, song_id = %song.id, "Duplicate audio, skipping remaining stages");
                self.storage.discard(&self.storage.input_path(&locator)).await;
                run.observer.duplicate_detected(song.id);
                Ok(Some(song))
            }
            DedupLookup::Miss => Ok(None),
        }
    }

    async fn run_separate(&self, run: &mut RunState<'_>) -> Result<(), PipelineError> {
        let stage = StageKind::Separate;
        let locator = self.current_locator(run, stage)?;
        self.wait_visible(stage, &self.storage.input_path(&locator), run.cancel)
            .await?;

        self.call(stage, run.cancel, self.stages.separate(&locator))
            .await?;

        let stem = VocalStem {
            path: self.storage.vocal_stem_path(&locator),
            stem_name: locator,
        };
        self.wait_visible(stage, &stem.path, run.cancel).await?;
        debug!(job_id = %run.job_id, stem = %stem.path.display(), "Vocal stem ready");
        run.stem = Some(stem);
        Ok(())
    }

    async fn run_transcribe(&self, run: &mut RunState<'_>) -> Result<(), PipelineError> {
        let stage = StageKind::Transcribe;
        let stem = run.stem.clone().ok_or_else(|| {
            PipelineError::Validation("no vocal stem available for transcription".to_string())
        })?;
        self.wait_visible(stage, &stem.path, run.cancel).await?;

        let transcription = self
            .call(stage, run.cancel, self.stages.transcribe(&stem.stem_name))
            .await?;
        debug!(job_id = %run.job_id, chars = transcription.lyrics.len(), "Transcribed");
        run.bundle.lyrics = Some(transcription.lyrics);
        Ok(())
    }

    async fn run_classify(&self, run: &mut RunState<'_>) -> Result<(), PipelineError> {
        let stage = StageKind::Classify;
        let lyrics = run.bundle.lyrics.clone().ok_or_else(|| {
            PipelineError::Validation("no lyrics available for classification".to_string())
        })?;

        let classification = self
            .call(stage, run.cancel, self.stages.classify(&lyrics))
            .await?;
        debug!(
            job_id = %run.job_id,
            label = %classification.label,
            confidence = classification.confidence,
            "Classified"
        );
        run.bundle.classification = Some(classification);
        Ok(())
    }

    fn current_locator(&self, run: &RunState<'_>, stage: StageKind) -> Result<String, PipelineError> {
        run.locator.clone().ok_or_else(|| {
            PipelineError::Validation(format!("{} needs an audio input", stage.label()))
        })
    }

    /// Run a stage call, racing it against cancellation
    async fn call<T, F>(
        &self,
        stage: StageKind,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, StageError>>,
    {
        tokio::select! {
            _ = cancel.cancelled() => Err(PipelineError::Cancelled { stage: Some(stage) }),
            result = call => result.map_err(|fault| {
                warn!(stage = %stage, "Stage call failed: {}", fault);
                PipelineError::StageFault { stage, fault }
            }),
        }
    }

    async fn wait_visible(
        &self,
        stage: StageKind,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.waiter
            .await_visible(path, self.settings.sync_timeout, cancel)
            .await
            .map_err(|e| match e {
                SyncError::Timeout { path, waited } => {
                    warn!(stage = %stage, path = %path.display(), "Artifact never became visible");
                    PipelineError::SynchronizationTimeout {
                        stage,
                        path,
                        waited,
                    }
                }
                SyncError::Cancelled { .. } => PipelineError::Cancelled { stage: Some(stage) },
            })
    }
}

fn is_wav(locator: &str) -> bool {
    PathBuf::from(locator)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_wav() {
        assert!(is_wav("a.wav"));
        assert!(is_wav("A.WAV"));
        assert!(!is_wav("a.mp3"));
        assert!(!is_wav("wav"));
    }
}
