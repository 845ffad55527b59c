//! Configuration for the engine.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PULPIT_HOME, PULPIT_REMOTE_URL, ...)
//! 2. Config file (.pulpit/config.yaml)
//! 3. Defaults (~/.pulpit)
//!
//! Config file discovery:
//! - Searches current directory and parents for .pulpit/config.yaml
//!
//! Thresholds ("stuck" detection, pass intervals, batch sizes) are
//! tunables, not hard-coded behavior.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub producers: Option<ProducersConfig>,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProducersConfig {
    pub transcription_url: Option<String>,
    pub summary_url: Option<String>,
    pub token: Option<String>,
    pub model: Option<String>,
}

/// When and how hard the sync coordinator works.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Periodic trigger interval for the background manager
    #[serde(default = "default_sync_interval")]
    pub interval_seconds: u64,

    /// Max records pushed per pass
    #[serde(default = "default_push_batch")]
    pub push_batch_size: usize,

    /// Per-call network timeout
    #[serde(default = "default_network_timeout")]
    pub network_timeout_seconds: u64,
}

fn default_sync_interval() -> u64 {
    300
}
fn default_push_batch() -> usize {
    8
}
fn default_network_timeout() -> u64 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_sync_interval(),
            push_batch_size: default_push_batch(),
            network_timeout_seconds: default_network_timeout(),
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_seconds)
    }
}

/// Stuck-job detection tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoverySettings {
    /// Grace period before an in-flight job counts as abandoned
    #[serde(default = "default_stuck_after")]
    pub stuck_after_seconds: u64,

    /// Max submissions per job kind per scan
    #[serde(default = "default_recovery_batch")]
    pub batch_size: usize,
}

fn default_stuck_after() -> u64 {
    120
}
fn default_recovery_batch() -> usize {
    4
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            stuck_after_seconds: default_stuck_after(),
            batch_size: default_recovery_batch(),
        }
    }
}

impl RecoverySettings {
    pub fn stuck_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stuck_after_seconds as i64)
    }
}

/// Resolved configuration with absolute paths and applied overrides.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the engine home (store lives under it)
    pub home: PathBuf,

    /// Remote backend base URL
    pub remote_url: String,

    /// Remote backend bearer token, if configured
    pub remote_token: Option<String>,

    pub transcription_url: String,

    pub summary_url: String,

    /// Producer bearer token, if configured
    pub producer_token: Option<String>,

    /// Transcription model name passed to the producer
    pub model: String,

    pub sync: SyncSettings,

    pub recovery: RecoverySettings,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".pulpit").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn env_or<F: FnOnce() -> String>(var: &str, fallback: F) -> String {
    std::env::var(var).unwrap_or_else(|_| fallback())
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".pulpit");

    let config_file = find_config_file();
    let file = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    let home = if let Ok(env_home) = std::env::var("PULPIT_HOME") {
        PathBuf::from(env_home)
    } else if let Some(home) = file.as_ref().and_then(|f| f.home.clone()) {
        PathBuf::from(home)
    } else {
        default_home
    };

    let remote = file.as_ref().and_then(|f| f.remote.clone()).unwrap_or_default();
    let producers = file
        .as_ref()
        .and_then(|f| f.producers.clone())
        .unwrap_or_default();

    Ok(ResolvedConfig {
        home,
        remote_url: env_or("PULPIT_REMOTE_URL", || {
            remote
                .url
                .clone()
                .unwrap_or_else(|| "https://sync.pulpit.app".to_string())
        }),
        remote_token: std::env::var("PULPIT_REMOTE_TOKEN")
            .ok()
            .or(remote.token),
        transcription_url: env_or("PULPIT_TRANSCRIBE_URL", || {
            producers
                .transcription_url
                .clone()
                .unwrap_or_else(|| "https://asr.pulpit.app/v1/transcribe".to_string())
        }),
        summary_url: env_or("PULPIT_SUMMARY_URL", || {
            producers
                .summary_url
                .clone()
                .unwrap_or_else(|| "https://asr.pulpit.app/v1/summarize".to_string())
        }),
        producer_token: std::env::var("PULPIT_PRODUCER_TOKEN")
            .ok()
            .or(producers.token),
        model: producers.model.unwrap_or_else(|| "base".to_string()),
        sync: file.as_ref().map(|f| f.sync.clone()).unwrap_or_default(),
        recovery: file
            .as_ref()
            .map(|f| f.recovery.clone())
            .unwrap_or_default(),
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the store directory ($PULPIT_HOME/store)
pub fn store_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("store"))
}
