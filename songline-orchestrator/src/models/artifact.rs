//! Stage artifacts
//!
//! Each stage produces a distinct shape that is folded into the next stage's
//! input or into the final [`ArtifactBundle`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Placeholder used when identification returns no candidate match
pub const UNKNOWN: &str = "unknown";

/// One candidate match from the identify service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub title: String,
    pub artist: String,
}

impl CandidateMatch {
    pub fn unknown() -> Self {
        Self {
            title: UNKNOWN.to_string(),
            artist: UNKNOWN.to_string(),
        }
    }
}

/// Identify stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub fingerprint: String,
    pub duration_seconds: f64,
    /// Ordered, best first
    pub candidate_matches: Vec<CandidateMatch>,
}

impl Identification {
    /// First candidate, or `{"unknown", "unknown"}` when the list is empty
    pub fn best_match(&self) -> CandidateMatch {
        self.candidate_matches
            .first()
            .cloned()
            .unwrap_or_else(CandidateMatch::unknown)
    }
}

/// Separate stage output: location of the isolated vocal stem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocalStem {
    /// Name passed to the transcribe service
    pub stem_name: String,
    /// Where the stem becomes visible in shared storage
    pub path: PathBuf,
}

/// Transcribe stage output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    pub lyrics: String,
}

/// Classify stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    /// Always within `[0, 1]`; the stage client rejects anything else
    pub confidence: f64,
}

/// Everything one pipeline run accumulated, ready to be committed as a Song
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactBundle {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_seconds: Option<f64>,
    pub fingerprint: Option<String>,
    pub lyrics: Option<String>,
    pub classification: Option<Classification>,
    /// Name of the audio (or stem) file in shared storage
    pub source_artifact_ref: Option<String>,
}

impl ArtifactBundle {
    /// Fold an identification result in (best match + fingerprint + duration)
    pub fn apply_identification(&mut self, identification: &Identification) {
        let best = identification.best_match();
        self.title = Some(best.title);
        self.artist = Some(best.artist);
        self.fingerprint = Some(identification.fingerprint.clone());
        self.duration_seconds = Some(identification.duration_seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_match_defaults_to_unknown() {
        let id = Identification {
            fingerprint: "AQAA".to_string(),
            duration_seconds: 12.0,
            candidate_matches: vec![],
        };
        assert_eq!(id.best_match(), CandidateMatch::unknown());
    }

    #[test]
    fn test_best_match_is_first_candidate() {
        let id = Identification {
            fingerprint: "AQAA".to_string(),
            duration_seconds: 12.0,
            candidate_matches: vec![
                CandidateMatch {
                    title: "First".to_string(),
                    artist: "A".to_string(),
                },
                CandidateMatch {
                    title: "Second".to_string(),
                    artist: "B".to_string(),
                },
            ],
        };
        assert_eq!(id.best_match().title, "First");

        let mut bundle = ArtifactBundle::default();
        bundle.apply_identification(&id);
        assert_eq!(bundle.title.as_deref(), Some("First"));
        assert_eq!(bundle.artist.as_deref(), Some("A"));
        assert_eq!(bundle.fingerprint.as_deref(), Some("AQAA"));
        assert_eq!(bundle.duration_seconds, Some(12.0));
    }
}
