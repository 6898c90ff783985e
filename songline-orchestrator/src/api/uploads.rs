//! Upload staging
//!
//! POST /api/uploads?filename=<name> stores the raw request body in the shared
//! directory under a fresh name and returns the locator to submit jobs with.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::services::SharedStorage;
use crate::AppState;

const MAX_EXTENSION_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    /// Original client file name; only its extension is kept
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub locator: String,
    pub size_bytes: usize,
}

/// POST /api/uploads
pub async fn upload_audio(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("upload body is empty".to_string()));
    }

    let locator = staged_name(params.filename.as_deref());
    tokio::fs::create_dir_all(state.storage.root()).await?;
    stage_upload(&state.storage, &locator, &body).await?;

    tracing::info!(locator = %locator, size_bytes = body.len(), "Upload staged");

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            locator,
            size_bytes: body.len(),
        }),
    ))
}

/// Write to a hidden `.part` file, then rename so other processes never
/// observe a half-written upload. The partial file is removed on failure.
async fn stage_upload(storage: &SharedStorage, locator: &str, body: &[u8]) -> std::io::Result<()> {
    let final_path = storage.input_path(locator);
    let partial_path = storage.input_path(&format!(".{}.part", locator));

    let result = match tokio::fs::write(&partial_path, body).await {
        Ok(()) => tokio::fs::rename(&partial_path, &final_path).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        storage.discard(&partial_path).await;
    }
    result
}

/// Fresh UUID file name keeping a sane extension from the client name
fn staged_name(original: Option<&str>) -> String {
    let extension = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| ext.to_ascii_lowercase());

    match extension {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/api/uploads", post(upload_audio))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stage_upload_writes_final_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SharedStorage::new(dir.path());

        stage_upload(&storage, "a.wav", b"audio").await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.wav")).unwrap(), b"audio");
        assert!(!dir.path().join(".a.wav.part").exists());
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SharedStorage::new(dir.path());
        // A file cannot be renamed over a directory
        let occupied = dir.path().join("occupied");
        std::fs::create_dir(&occupied).unwrap();
        std::fs::write(occupied.join("keep"), "x").unwrap();

        assert!(stage_upload(&storage, "occupied", b"audio").await.is_err());
        assert!(!dir.path().join(".occupied.part").exists());
        assert!(occupied.join("keep").exists());
    }

    #[test]
    fn test_staged_name_keeps_extension() {
        let name = staged_name(Some("My Song.MP3"));
        assert!(name.ends_with(".mp3"));
        assert!(Uuid::parse_str(name.trim_end_matches(".mp3")).is_ok());
    }

    #[test]
    fn test_staged_name_drops_suspicious_extension() {
        assert!(!staged_name(Some("evil.w/av")).contains('/'));
        assert!(!staged_name(Some("noext")).contains('.'));
        assert!(!staged_name(None).contains('.'));
        assert!(!staged_name(Some("a.verylongextension")).contains('.'));
    }
}
