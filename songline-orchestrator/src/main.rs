//! songline-orchestrator - Audio analysis pipeline orchestrator
//!
//! Drives staged uploads through Identify → Separate → Transcribe → Classify by
//! calling the analysis services over HTTP, and serves the job API on
//! port 5790 by default.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use songline_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use songline_orchestrator::config::{Args, OrchestratorConfig};
use songline_orchestrator::db::{self, JobStore, SongStore, SqliteJobStore, SqliteSongStore};
use songline_orchestrator::pipeline::{Composer, ComposerSettings};
use songline_orchestrator::services::{
    HttpStageClient, JobJournal, JobRunner, JobTracker, PollingWaiter, SharedStorage,
};
use songline_orchestrator::AppState;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = OrchestratorConfig::load(&args).context("Failed to load configuration")?;

    init_tracing(&config.logging.level);

    info!("Starting songline-orchestrator");
    info!(
        "Version: {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    config.log_summary();

    let storage = SharedStorage::new(config.root_folder.clone());
    storage
        .ensure_layout()
        .with_context(|| format!("Failed to create {}", config.root_folder.display()))?;

    let pool = db::init_database_pool(&config.database_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    // Jobs left queued or running by a previous process will never finish
    let interrupted = db::fail_interrupted_jobs(&pool)
        .await
        .context("Failed to recover job records")?;
    if interrupted > 0 {
        warn!("Marked {} interrupted job(s) from the previous run as failed", interrupted);
    }

    let songs: Arc<dyn SongStore> = Arc::new(SqliteSongStore::new(pool.clone()));
    let jobs: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(pool));

    let stage_client = HttpStageClient::new(config.stages.clone(), config.timeouts.clone())
        .map_err(|e| anyhow::anyhow!("Failed to create stage client: {}", e))?;

    let composer = Composer::new(
        Arc::new(stage_client),
        Arc::new(PollingWaiter::new(config.sync.poll_interval())),
        storage.clone(),
        songs.clone(),
        ComposerSettings {
            sync_timeout: config.sync.timeout(),
            convert_non_wav: config.convert_non_wav,
        },
    );

    let event_bus = EventBus::new(256);
    let tracker = Arc::new(
        JobTracker::new(event_bus.clone())
            .with_journal(JobJournal::spawn(jobs.clone()))
            .with_retention(config.retained_jobs),
    );
    let runner = JobRunner::new(tracker, Arc::new(composer), config.max_concurrent_jobs);

    let state = AppState::new(runner, songs, jobs, storage, event_bus)
        .with_max_upload_bytes(config.max_upload_bytes);
    let app = songline_orchestrator::build_router(state);

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins; otherwise the configured level applies to songline crates and tower_http
fn init_tracing(level: &str) {
    let directive = if LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        format!(
            "songline_orchestrator={0},songline_common={0},tower_http={0}",
            level.to_ascii_lowercase()
        )
    } else {
        level.to_string()
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
