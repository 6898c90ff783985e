//! Persisted song record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::ArtifactBundle;

/// Canonical result record, owned by the persistence store once committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: Uuid,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_seconds: Option<f64>,
    /// Unique when present
    pub fingerprint: Option<String>,
    pub lyrics: Option<String>,
    pub classification: Option<String>,
    pub confidence: Option<f64>,
    pub source_artifact_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Song {
    /// Build a not-yet-persisted song from a pipeline run's artifacts
    pub fn from_bundle(bundle: ArtifactBundle) -> Self {
        let (classification, confidence) = match bundle.classification {
            Some(c) => (Some(c.label), Some(c.confidence)),
            None => (None, None),
        };

        Self {
            id: Uuid::new_v4(),
            title: bundle.title,
            artist: bundle.artist,
            duration_seconds: bundle.duration_seconds,
            fingerprint: bundle.fingerprint,
            lyrics: bundle.lyrics,
            classification,
            confidence,
            source_artifact_ref: bundle.source_artifact_ref,
            created_at: Utc::now(),
        }
    }

    /// Unique dedup key for this song, if it has a fingerprint
    pub fn fingerprint_key(&self) -> Option<String> {
        self.fingerprint.as_deref().map(fingerprint_key)
    }
}

/// SHA-256 hex digest of the exact fingerprint string
///
/// Chromaprint fingerprints run to kilobytes; the digest keeps the UNIQUE index
/// small while matching stays exact.
pub fn fingerprint_key(fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    format!("{:x}", hasher.finalize())
}
