//! Configuration resolution for songline-orchestrator
//!
//! Priority (highest first): command-line flags → `SONGLINE_*` environment
//! variables → TOML file → compiled defaults. clap handles the first two tiers;
//! this module layers them over the TOML file.

use clap::Parser;
use serde::{Deserialize, Serialize};
use songline_common::config::{
    default_config_file, load_toml_or_default, resolve_root_folder, LoggingConfig,
};
use songline_common::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Default TOML file name under `~/.config/songline/`
pub const CONFIG_FILE_NAME: &str = "orchestrator.toml";

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5790;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;
pub const DEFAULT_RETAINED_JOBS: usize = 500;

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "songline-orchestrator")]
#[command(about = "Audio analysis pipeline orchestrator")]
#[command(version)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "SONGLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Shared data root (staged uploads, vocal stems, database)
    #[arg(short, long, env = "SONGLINE_ROOT_FOLDER")]
    pub root_folder: Option<PathBuf>,

    /// SQLite database path (defaults to <root>/songline.db)
    #[arg(long, env = "SONGLINE_DATABASE")]
    pub database: Option<PathBuf>,

    /// Bind address
    #[arg(long, env = "SONGLINE_BIND")]
    pub bind: Option<String>,

    /// HTTP port
    #[arg(short, long, env = "SONGLINE_PORT")]
    pub port: Option<u16>,

    /// Identify (and convert) service base URL
    #[arg(long, env = "SONGLINE_IDENTIFY_URL")]
    pub identify_url: Option<String>,

    /// Separate service base URL
    #[arg(long, env = "SONGLINE_SEPARATE_URL")]
    pub separate_url: Option<String>,

    /// Transcribe service base URL
    #[arg(long, env = "SONGLINE_TRANSCRIBE_URL")]
    pub transcribe_url: Option<String>,

    /// Classify service base URL
    #[arg(long, env = "SONGLINE_CLASSIFY_URL")]
    pub classify_url: Option<String>,

    /// Maximum number of jobs executing at once
    #[arg(long, env = "SONGLINE_MAX_CONCURRENT_JOBS")]
    pub max_concurrent_jobs: Option<usize>,

    /// How long to wait for a shared-storage artifact to appear (ms)
    #[arg(long, env = "SONGLINE_SYNC_TIMEOUT_MS")]
    pub sync_timeout_ms: Option<u64>,

    /// Finished jobs kept in memory; older ones are served from the database
    #[arg(long, env = "SONGLINE_RETAINED_JOBS")]
    pub retained_jobs: Option<usize>,
}

/// Base URLs of the four analysis services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageEndpoints {
    pub identify_url: String,
    pub separate_url: String,
    pub transcribe_url: String,
    pub classify_url: String,
}

impl Default for StageEndpoints {
    fn default() -> Self {
        Self {
            identify_url: "http://127.0.0.1:5791".to_string(),
            separate_url: "http://127.0.0.1:5792".to_string(),
            transcribe_url: "http://127.0.0.1:5793".to_string(),
            classify_url: "http://127.0.0.1:5794".to_string(),
        }
    }
}

/// Per-stage HTTP request timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    pub connect_secs: u64,
    pub identify_secs: u64,
    pub separate_secs: u64,
    pub transcribe_secs: u64,
    pub classify_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            identify_secs: 120,
            separate_secs: 900,
            transcribe_secs: 600,
            classify_secs: 60,
        }
    }
}

impl StageTimeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

/// Shared-storage synchronizer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            timeout_ms: 10_000,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Contents of `orchestrator.toml`; every key is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub max_concurrent_jobs: Option<usize>,
    pub retained_jobs: Option<usize>,
    pub convert_non_wav: Option<bool>,
    pub max_upload_bytes: Option<usize>,
    pub stages: StageEndpoints,
    pub timeouts: StageTimeouts,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Fully resolved runtime configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub bind_address: String,
    pub port: u16,
    pub root_folder: PathBuf,
    pub database_path: PathBuf,
    pub stages: StageEndpoints,
    pub timeouts: StageTimeouts,
    pub sync: SyncConfig,
    pub max_concurrent_jobs: usize,
    pub retained_jobs: usize,
    /// Convert non-`.wav` uploads through the identify service before fingerprinting
    pub convert_non_wav: bool,
    pub max_upload_bytes: usize,
    pub logging: LoggingConfig,
}

impl OrchestratorConfig {
    /// Resolve configuration from CLI/env arguments plus the TOML file
    pub fn load(args: &Args) -> Result<Self> {
        let toml_path = args
            .config
            .clone()
            .or_else(|| default_config_file(CONFIG_FILE_NAME));
        let toml: TomlConfig = load_toml_or_default(toml_path.as_deref())?;
        let config = Self::merge(args, toml);
        config.validate()?;
        Ok(config)
    }

    /// Layer CLI/env values over TOML values over defaults
    pub fn merge(args: &Args, toml: TomlConfig) -> Self {
        let root_folder = resolve_root_folder(
            args.root_folder.as_deref(),
            "SONGLINE_ROOT_FOLDER",
            toml.root_folder.as_deref(),
        );

        let database_path = args
            .database
            .clone()
            .or(toml.database_path)
            .unwrap_or_else(|| root_folder.join("songline.db"));

        let mut stages = toml.stages;
        override_with(&mut stages.identify_url, &args.identify_url);
        override_with(&mut stages.separate_url, &args.separate_url);
        override_with(&mut stages.transcribe_url, &args.transcribe_url);
        override_with(&mut stages.classify_url, &args.classify_url);

        let mut sync = toml.sync;
        if let Some(timeout_ms) = args.sync_timeout_ms {
            sync.timeout_ms = timeout_ms;
        }

        Self {
            bind_address: args
                .bind
                .clone()
                .or(toml.bind_address)
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            port: args.port.or(toml.port).unwrap_or(DEFAULT_PORT),
            root_folder,
            database_path,
            stages,
            timeouts: toml.timeouts,
            sync,
            max_concurrent_jobs: args
                .max_concurrent_jobs
                .or(toml.max_concurrent_jobs)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS),
            retained_jobs: args
                .retained_jobs
                .or(toml.retained_jobs)
                .unwrap_or(DEFAULT_RETAINED_JOBS),
            convert_non_wav: toml.convert_non_wav.unwrap_or(true),
            max_upload_bytes: toml.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            logging: toml.logging,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(Error::Config("max_concurrent_jobs must be at least 1".to_string()));
        }
        if self.sync.poll_interval_ms == 0 {
            return Err(Error::Config("sync.poll_interval_ms must be positive".to_string()));
        }
        if self.sync.timeout_ms < self.sync.poll_interval_ms {
            return Err(Error::Config(format!(
                "sync.timeout_ms ({}) is shorter than sync.poll_interval_ms ({})",
                self.sync.timeout_ms, self.sync.poll_interval_ms
            )));
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| {
                Error::Config(format!(
                    "Invalid bind address {}:{}: {}",
                    self.bind_address, self.port, e
                ))
            })
    }

    pub fn log_summary(&self) {
        info!("Shared data root: {}", self.root_folder.display());
        info!("Database: {}", self.database_path.display());
        info!(
            identify = %self.stages.identify_url,
            separate = %self.stages.separate_url,
            transcribe = %self.stages.transcribe_url,
            classify = %self.stages.classify_url,
            "Stage services"
        );
        info!(
            max_concurrent_jobs = self.max_concurrent_jobs,
            retained_jobs = self.retained_jobs,
            sync_timeout_ms = self.sync.timeout_ms,
            convert_non_wav = self.convert_non_wav,
            "Pipeline settings"
        );
    }
}

fn override_with(target: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        if !value.trim().is_empty() {
            *target = value.trim_end_matches('/').to_string();
        }
    }
}
