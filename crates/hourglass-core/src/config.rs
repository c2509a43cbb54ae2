use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HourglassError, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 4_000;
pub const DEFAULT_STALE_AFTER_SECS: u64 = 600;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_RECLAIMS: u32 = 3;
/// Upper bound for `recovery.stale_after_secs` (one year).
pub const MAX_STALE_AFTER_SECS: u64 = 365 * 24 * 60 * 60;

/// Top-level config (hourglass.toml + HOURGLASS_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourglassConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite file shared by the HTTP surface and every worker.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl DatabaseConfig {
    /// Create the directory that will hold the database file.
    pub fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = std::path::Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Claim Engine and Execution Supervisor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops.
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// How long an idle worker sleeps between claim attempts.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Hard deadline for a single command execution.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// Captured stdout/stderr is truncated to this many chars before logging.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_WORKER_COUNT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            execution_timeout_secs: DEFAULT_EXECUTION_TIMEOUT_SECS,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }
}

/// Orphan reclaim policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// A claimed task with no terminal timestamp whose pick/start is older
    /// than this is considered orphaned.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Requeues allowed per task before it is failed permanently.
    #[serde(default = "default_max_reclaims")]
    pub max_reclaims: u32,
}

impl RecoveryConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            max_reclaims: DEFAULT_MAX_RECLAIMS,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_execution_timeout_secs() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT_SECS
}
fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}
fn default_stale_after_secs() -> u64 {
    DEFAULT_STALE_AFTER_SECS
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_max_reclaims() -> u32 {
    DEFAULT_MAX_RECLAIMS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.hourglass/hourglass.db", home)
}

impl HourglassConfig {
    /// Load config from a TOML file with HOURGLASS_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.hourglass/hourglass.toml
    ///
    /// A missing file is not an error; every field has a default. Nested keys
    /// use a double underscore: `HOURGLASS_WORKER__POLL_INTERVAL_MS=250`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(path = %path, "loading config");

        let config: HourglassConfig = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("HOURGLASS_").split("__"))
            .extract()
            .map_err(|e| HourglassError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        if self.worker.count == 0 {
            return Err(HourglassError::Config("worker.count must be at least 1".into()));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(HourglassError::Config(
                "worker.poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.worker.execution_timeout_secs == 0 {
            return Err(HourglassError::Config(
                "worker.execution_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.recovery.sweep_interval_secs == 0 {
            return Err(HourglassError::Config(
                "recovery.sweep_interval_secs must be greater than 0".into(),
            ));
        }
        if self.recovery.stale_after_secs > MAX_STALE_AFTER_SECS {
            return Err(HourglassError::Config(format!(
                "recovery.stale_after_secs ({}) must not exceed {}",
                self.recovery.stale_after_secs, MAX_STALE_AFTER_SECS
            )));
        }
        // A healthy execution that is merely slow must never look orphaned.
        if self.recovery.stale_after_secs <= self.worker.execution_timeout_secs {
            return Err(HourglassError::Config(format!(
                "recovery.stale_after_secs ({}) must exceed worker.execution_timeout_secs ({})",
                self.recovery.stale_after_secs, self.worker.execution_timeout_secs
            )));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.hourglass/hourglass.toml", home)
}
