//! Stage plan resolution
//!
//! Validates a [`PipelineRequest`] and resolves the ordered list of stages
//! strictly after `start` and up to and including `end`.

use songline_common::stage::STAGE_ORDER;
use songline_common::StageKind;

use super::PipelineError;
use crate::models::{PipelineInput, PipelineRequest, StartPoint};
use crate::services::synchronizer::validate_locator;

/// Stages strictly after `start`, up to and including `end`
///
/// Empty when `start` does not precede `end`.
pub fn stages_between(start: StartPoint, end: StageKind) -> Vec<StageKind> {
    STAGE_ORDER
        .iter()
        .copied()
        .filter(|stage| stage.index() + 1 > start.rank() && *stage <= end)
        .collect()
}

/// A validated request plus the stages it will run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePlan {
    pub input: PipelineInput,
    pub start: StartPoint,
    pub end: StageKind,
    pub stages: Vec<StageKind>,
}

impl PipelinePlan {
    pub fn resolve(request: &PipelineRequest) -> Result<Self, PipelineError> {
        let start = request.start;
        let end = request.end;

        if !end.is_valid_end() {
            return Err(PipelineError::Validation(format!(
                "{} is not a valid end stage",
                end
            )));
        }
        if !start.precedes_or_equals(end) {
            return Err(PipelineError::Validation(format!(
                "start '{}' comes after end '{}'",
                start, end
            )));
        }

        let stages = match &request.input {
            PipelineInput::Audio { locator, .. } => {
                validate_locator(locator).map_err(PipelineError::Validation)?;
                match start {
                    StartPoint::Audio
                    | StartPoint::Stage(StageKind::Identify)
                    | StartPoint::Stage(StageKind::Separate) => stages_between(start, end),
                    other => {
                        return Err(PipelineError::Validation(format!(
                            "audio input cannot start at '{}'",
                            other
                        )))
                    }
                }
            }
            PipelineInput::Text { lyrics } => {
                if lyrics.trim().is_empty() {
                    return Err(PipelineError::Validation("lyrics must not be empty".to_string()));
                }
                if start != StartPoint::Stage(StageKind::Transcribe) || end != StageKind::Classify {
                    return Err(PipelineError::Validation(
                        "text input runs from transcribe to classify only".to_string(),
                    ));
                }
                stages_between(start, end)
            }
            PipelineInput::SearchByMetadata { title, artist } => {
                if title.trim().is_empty() || artist.trim().is_empty() {
                    return Err(PipelineError::Validation(
                        "search needs both title and artist".to_string(),
                    ));
                }
                Vec::new()
            }
        };

        Ok(Self {
            input: request.input.clone(),
            start,
            end,
            stages,
        })
    }

    pub fn runs(&self, stage: StageKind) -> bool {
        self.stages.contains(&stage)
    }
}
