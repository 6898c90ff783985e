//! Fixed analysis stage sequence
//!
//! The pipeline is a fixed chain `Identify → Separate → Transcribe → Classify`.
//! Declaration order of [`StageKind`] *is* the precedence order, so `Ord` on the
//! enum and [`StageKind::index`] always agree with [`STAGE_ORDER`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One discrete analysis step executed by an external service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Audio fingerprint + metadata identification
    Identify,
    /// Vocal stem separation
    Separate,
    /// Speech-to-text on the vocal stem
    Transcribe,
    /// Lyric text classification
    Classify,
}

/// Total order of the stage sequence
pub const STAGE_ORDER: [StageKind; 4] = [
    StageKind::Identify,
    StageKind::Separate,
    StageKind::Transcribe,
    StageKind::Classify,
];

impl StageKind {
    /// Position in [`STAGE_ORDER`]
    pub fn index(self) -> usize {
        match self {
            StageKind::Identify => 0,
            StageKind::Separate => 1,
            StageKind::Transcribe => 2,
            StageKind::Classify => 3,
        }
    }

    /// Whether a pipeline may stop after this stage
    ///
    /// Separate has no externally meaningful output on its own; it is always an
    /// internal hop toward Transcribe.
    pub fn is_valid_end(self) -> bool {
        !matches!(self, StageKind::Separate)
    }

    /// Stable lowercase name (matches the serde representation)
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Identify => "identify",
            StageKind::Separate => "separate",
            StageKind::Transcribe => "transcribe",
            StageKind::Classify => "classify",
        }
    }

    /// Human-facing label used in job failure reasons
    pub fn label(self) -> &'static str {
        match self {
            StageKind::Identify => "Identify",
            StageKind::Separate => "Separate",
            StageKind::Transcribe => "Transcribe",
            StageKind::Classify => "Classify",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identify" => Ok(StageKind::Identify),
            "separate" | "stems" => Ok(StageKind::Separate),
            "transcribe" | "lyrics" => Ok(StageKind::Transcribe),
            "classify" | "classification" => Ok(StageKind::Classify),
            other => Err(crate::Error::InvalidInput(format!("Unknown stage: {}", other))),
        }
    }
}
