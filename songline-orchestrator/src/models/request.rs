//! Pipeline request model
//!
//! A request names what is already in hand (`start`) and how far the pipeline
//! should go (`end`). Range validation lives in [`crate::pipeline::plan`].

use serde::{Deserialize, Serialize};
use songline_common::StageKind;
use std::fmt;
use std::str::FromStr;

/// Kind of input the client submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Audio,
    Text,
    SearchByMetadata,
}

/// Where the pipeline starts: raw audio, or the artifact of an already-run stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StartPoint {
    /// Raw uploaded audio, precedes every stage
    Audio,
    /// The artifact of this stage is already in hand
    Stage(StageKind),
}

impl StartPoint {
    /// Rank in the total order `Audio < Identify < Separate < Transcribe < Classify`
    pub fn rank(self) -> usize {
        match self {
            StartPoint::Audio => 0,
            StartPoint::Stage(stage) => stage.index() + 1,
        }
    }

    /// Whether this start point precedes or equals `end`
    pub fn precedes_or_equals(self, end: StageKind) -> bool {
        self.rank() <= end.index() + 1
    }
}

impl fmt::Display for StartPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPoint::Audio => f.write_str("audio"),
            StartPoint::Stage(stage) => write!(f, "{}", stage),
        }
    }
}

impl FromStr for StartPoint {
    type Err = songline_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("audio") {
            Ok(StartPoint::Audio)
        } else {
            s.parse::<StageKind>().map(StartPoint::Stage)
        }
    }
}

impl TryFrom<String> for StartPoint {
    type Error = songline_common::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StartPoint> for String {
    fn from(value: StartPoint) -> Self {
        value.to_string()
    }
}

/// Input payload, one variant per [`InputKind`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineInput {
    /// Staged audio file (locator is a file name inside the shared directory)
    Audio {
        locator: String,
        /// Caller-supplied metadata, used when identification is skipped
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        artist: Option<String>,
    },
    /// Lyrics already known
    Text { lyrics: String },
    /// Look up a previously persisted song
    SearchByMetadata { title: String, artist: String },
}

impl PipelineInput {
    pub fn kind(&self) -> InputKind {
        match self {
            PipelineInput::Audio { .. } => InputKind::Audio,
            PipelineInput::Text { .. } => InputKind::Text,
            PipelineInput::SearchByMetadata { .. } => InputKind::SearchByMetadata,
        }
    }
}

/// A submitted pipeline request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub input: PipelineInput,
    pub start: StartPoint,
    pub end: StageKind,
}

impl PipelineRequest {
    /// Full audio run: `Audio → … → end`
    pub fn audio(locator: impl Into<String>, end: StageKind) -> Self {
        Self {
            input: PipelineInput::Audio {
                locator: locator.into(),
                title: None,
                artist: None,
            },
            start: StartPoint::Audio,
            end,
        }
    }

    /// Classify known lyrics
    pub fn text(lyrics: impl Into<String>) -> Self {
        Self {
            input: PipelineInput::Text {
                lyrics: lyrics.into(),
            },
            start: StartPoint::Stage(StageKind::Transcribe),
            end: StageKind::Classify,
        }
    }

    /// Metadata lookup, no stage runs
    pub fn search(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            input: PipelineInput::SearchByMetadata {
                title: title.into(),
                artist: artist.into(),
            },
            start: StartPoint::Stage(StageKind::Identify),
            end: StageKind::Identify,
        }
    }

    pub fn input_kind(&self) -> InputKind {
        self.input.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_point_rank_is_total() {
        let ranks: Vec<usize> = [
            StartPoint::Audio,
            StartPoint::Stage(StageKind::Identify),
            StartPoint::Stage(StageKind::Separate),
            StartPoint::Stage(StageKind::Transcribe),
            StartPoint::Stage(StageKind::Classify),
        ]
        .iter()
        .map(|s| s.rank())
        .collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_precedes_or_equals() {
        assert!(StartPoint::Audio.precedes_or_equals(StageKind::Identify));
        assert!(StartPoint::Stage(StageKind::Identify).precedes_or_equals(StageKind::Identify));
        assert!(!StartPoint::Stage(StageKind::Classify).precedes_or_equals(StageKind::Transcribe));
    }

    #[test]
    fn test_start_point_serde_as_string() {
        let json = serde_json::to_string(&StartPoint::Stage(StageKind::Separate)).unwrap();
        assert_eq!(json, "\"separate\"");
        let audio: StartPoint = serde_json::from_str("\"Audio\"").unwrap();
        assert_eq!(audio, StartPoint::Audio);
        assert!(serde_json::from_str::<StartPoint>("\"video\"").is_err());
    }

    #[test]
    fn test_request_constructors() {
        let text = PipelineRequest::text("la la la");
        assert_eq!(text.input_kind(), InputKind::Text);
        assert_eq!(text.start, StartPoint::Stage(StageKind::Transcribe));
        assert_eq!(text.end, StageKind::Classify);

        let audio = PipelineRequest::audio("song.wav", StageKind::Transcribe);
        assert_eq!(audio.input_kind(), InputKind::Audio);
        assert_eq!(audio.start, StartPoint::Audio);
    }
}
