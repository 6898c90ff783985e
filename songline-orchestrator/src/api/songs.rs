//! Song API handlers
//!
//! GET /api/songs, GET /api/songs/:id, GET /api/songs/search

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::Song;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub title: String,
    pub artist: String,
}

/// GET /api/songs/search response
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song: Option<Song>,
}

/// GET /api/songs (newest first)
pub async fn list_songs(State(state): State<AppState>) -> ApiResult<Json<Vec<Song>>> {
    Ok(Json(state.songs.list_all().await?))
}

/// GET /api/songs/:id
pub async fn get_song(
    State(state): State<AppState>,
    Path(song_id): Path<Uuid>,
) -> ApiResult<Json<Song>> {
    state
        .songs
        .get_by_id(song_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("song {}", song_id)))
}

/// GET /api/songs/search?title=&artist=
///
/// A miss is `{"found": false}`, not an error.
pub async fn search_songs(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    if params.title.trim().is_empty() || params.artist.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "title and artist are required".to_string(),
        ));
    }

    let song = state
        .songs
        .get_by_title_artist(&params.title, &params.artist)
        .await?;

    Ok(Json(SearchResponse {
        found: song.is_some(),
        song,
    }))
}

pub fn song_routes() -> Router<AppState> {
    Router::new()
        .route("/api/songs", get(list_songs))
        .route("/api/songs/search", get(search_songs))
        .route("/api/songs/:id", get(get_song))
}
