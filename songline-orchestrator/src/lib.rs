//! songline-orchestrator library interface
//!
//! Exposes the orchestration engine and the HTTP router for the binary and for
//! integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use songline_common::events::EventBus;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::db::{JobStore, SongStore};
use crate::services::{JobRunner, SharedStorage};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runner: JobRunner,
    pub songs: Arc<dyn SongStore>,
    /// Durable job history, including jobs no longer held by the runner
    pub jobs: Arc<dyn JobStore>,
    pub storage: SharedStorage,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        runner: JobRunner,
        songs: Arc<dyn SongStore>,
        jobs: Arc<dyn JobStore>,
        storage: SharedStorage,
        event_bus: EventBus,
    ) -> Self {
        Self {
            runner,
            songs,
            jobs,
            storage,
            event_bus,
            startup_time: Utc::now(),
            max_upload_bytes: config::DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes;

    Router::new()
        .merge(api::job_routes())
        .merge(api::song_routes())
        .merge(api::upload_routes().layer(DefaultBodyLimit::max(upload_limit)))
        .merge(api::event_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
