//! HTTP API handlers for songline-orchestrator

pub mod health;
pub mod jobs;
pub mod songs;
pub mod sse;
pub mod uploads;

pub use health::health_routes;
pub use jobs::job_routes;
pub use songs::song_routes;
pub use sse::event_routes;
pub use uploads::upload_routes;
