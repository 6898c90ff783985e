//! Stage service client
//!
//! Uniform request/response wrapper around the external analysis services.
//! Every transport or payload problem is normalized into [`StageError`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::{StageEndpoints, StageTimeouts};
use crate::models::{CandidateMatch, Classification, Identification, Transcription};

const USER_AGENT: &str = concat!("songline-orchestrator/", env!("CARGO_PKG_VERSION"));

/// Longest response body excerpt kept in an error
const BODY_EXCERPT_LEN: usize = 512;

/// Stage call errors
#[derive(Debug, Error)]
pub enum StageError {
    /// Connection refused, reset, DNS failure, ...
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request exceeded the stage's timeout
    #[error("Request timed out")]
    Timeout,

    /// Non-2xx response
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not match the expected contract
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Service answered 2xx but reported a processing error
    #[error("Rejected: {0}")]
    Rejected(String),
}

impl StageError {
    /// Short human-readable summary, safe to show to polling clients
    pub fn summary(&self) -> &'static str {
        match self {
            StageError::Transport(_) => "service unavailable",
            StageError::Timeout => "service timed out",
            StageError::Status { status, .. } if *status >= 500 => "service error",
            StageError::Status { .. } => "request rejected by service",
            StageError::Malformed(_) => "malformed response",
            StageError::Rejected(_) => "processing failed",
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StageError::Timeout
        } else {
            StageError::Transport(err.to_string())
        }
    }
}

/// Analysis services contract
///
/// Locators are file names inside the shared directory. Identify, Transcribe and
/// Classify return their artifacts inline; Separate only produces a file.
#[async_trait]
pub trait StageService: Send + Sync {
    /// Fingerprint and identify a staged audio file
    async fn identify(&self, locator: &str) -> Result<Identification, StageError>;

    /// Convert a staged audio file to wav; returns the converted file name
    async fn convert(&self, locator: &str) -> Result<String, StageError>;

    /// Write the isolated vocal stem of `locator` to the vocal stem directory
    async fn separate(&self, locator: &str) -> Result<(), StageError>;

    /// Transcribe a vocal stem
    async fn transcribe(&self, stem_name: &str) -> Result<Transcription, StageError>;

    /// Classify lyric text
    async fn classify(&self, lyrics: &str) -> Result<Classification, StageError>;
}

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    fingerprint: String,
    duration: f64,
    #[serde(default)]
    matches: Vec<MatchPayload>,
}

#[derive(Debug, Deserialize)]
struct MatchPayload {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct SeparateResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    lyrics: String,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    classification: String,
    accuracy: f64,
}

/// HTTP JSON client for the analysis services
pub struct HttpStageClient {
    http_client: reqwest::Client,
    endpoints: StageEndpoints,
    timeouts: StageTimeouts,
}

impl HttpStageClient {
    pub fn new(endpoints: StageEndpoints, timeouts: StageTimeouts) -> Result<Self, StageError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeouts.connect())
            .build()
            .map_err(|e| StageError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoints,
            timeouts,
        })
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StageError> {
        let status = response.status();
        let body = response.bytes().await.map_err(StageError::from_reqwest)?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(StageError::Status {
                status: status.as_u16(),
                body: excerpt(&text),
            });
        }

        serde_json::from_slice(&body).map_err(|e| StageError::Malformed(e.to_string()))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: String,
        body: serde_json::Value,
        timeout: u64,
    ) -> Result<T, StageError> {
        let response = self
            .http_client
            .post(&url)
            .timeout(Duration::from_secs(timeout))
            .json(&body)
            .send()
            .await
            .map_err(StageError::from_reqwest)?;

        Self::decode(response).await
    }
}

#[async_trait]
impl StageService for HttpStageClient {
    async fn identify(&self, locator: &str) -> Result<Identification, StageError> {
        tracing::debug!(locator, "Calling identify service");

        let response: IdentifyResponse = self
            .post_json(
                Self::url(&self.endpoints.identify_url, "identify"),
                serde_json::json!({ "filename": locator }),
                self.timeouts.identify_secs,
            )
            .await?;

        if response.fingerprint.trim().is_empty() {
            return Err(StageError::Malformed("empty fingerprint".to_string()));
        }
        if !response.duration.is_finite() || response.duration < 0.0 {
            return Err(StageError::Malformed(format!(
                "invalid duration {}",
                response.duration
            )));
        }

        let candidate_matches = response
            .matches
            .into_iter()
            .map(|m| CandidateMatch {
                title: m.title.unwrap_or_else(|| crate::models::artifact::UNKNOWN.to_string()),
                artist: m.artist.unwrap_or_else(|| crate::models::artifact::UNKNOWN.to_string()),
            })
            .collect();

        Ok(Identification {
            fingerprint: response.fingerprint,
            duration_seconds: response.duration,
            candidate_matches,
        })
    }

    async fn convert(&self, locator: &str) -> Result<String, StageError> {
        tracing::debug!(locator, "Calling convert service");

        let response: ConvertResponse = self
            .post_json(
                Self::url(&self.endpoints.identify_url, "convert"),
                serde_json::json!({ "filename": locator }),
                self.timeouts.identify_secs,
            )
            .await?;

        if response.filename.trim().is_empty() {
            return Err(StageError::Malformed("empty converted filename".to_string()));
        }
        Ok(response.filename)
    }

    async fn separate(&self, locator: &str) -> Result<(), StageError> {
        tracing::debug!(locator, "Calling separate service");

        let response: SeparateResponse = self
            .post_json(
                Self::url(&self.endpoints.separate_url, "separate"),
                serde_json::json!({ "filename": locator }),
                self.timeouts.separate_secs,
            )
            .await?;

        match response.status.as_str() {
            "ok" => Ok(()),
            "error" => Err(StageError::Rejected(
                response.message.unwrap_or_else(|| "unspecified error".to_string()),
            )),
            other => Err(StageError::Malformed(format!("unknown status '{}'", other))),
        }
    }

    async fn transcribe(&self, stem_name: &str) -> Result<Transcription, StageError> {
        tracing::debug!(stem_name, "Calling transcribe service");

        let response = self
            .http_client
            .get(Self::url(&self.endpoints.transcribe_url, "transcribe"))
            .query(&[("stem_name", stem_name)])
            .timeout(Duration::from_secs(self.timeouts.transcribe_secs))
            .send()
            .await
            .map_err(StageError::from_reqwest)?;

        let response: TranscribeResponse = Self::decode(response).await?;
        Ok(Transcription {
            lyrics: response.lyrics,
        })
    }

    async fn classify(&self, lyrics: &str) -> Result<Classification, StageError> {
        tracing::debug!(lyrics_len = lyrics.len(), "Calling classify service");

        let response: ClassifyResponse = self
            .post_json(
                Self::url(&self.endpoints.classify_url, "classify"),
                serde_json::json!({ "lyrics": lyrics }),
                self.timeouts.classify_secs,
            )
            .await?;

        if !(0.0..=1.0).contains(&response.accuracy) {
            return Err(StageError::Malformed(format!(
                "confidence {} outside [0, 1]",
                response.accuracy
            )));
        }

        Ok(Classification {
            label: response.classification,
            confidence: response.accuracy,
        })
    }
}

fn excerpt(text: &str) -> String {
    if text.len() <= BODY_EXCERPT_LEN {
        return text.to_string();
    }
    let mut end = BODY_EXCERPT_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
