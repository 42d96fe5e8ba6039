//! Node daemon configuration.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::LoggingConfig;

/// Root configuration for the node daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Base URL of the master API, e.g. `https://master.example.com`.
    pub master_url: String,
    /// File holding the node API key obtained at enrollment (mode 0600).
    #[serde(default = "default_key_file")]
    pub api_key_file: String,
    /// Root directory for per-job temp directories; swept on startup.
    #[serde(default = "default_work_root")]
    pub work_root: String,
    /// Directory scanned for WordPress installations.
    #[serde(default = "default_web_root")]
    pub web_root: String,
    /// Bind address of the control listener the master calls into.
    #[serde(default = "default_control_bind")]
    pub control_bind: String,
    /// Seconds between heartbeat reports to the master.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,
    /// Keep the temp directory of a failed job for operator inspection.
    #[serde(default)]
    pub keep_on_failure: bool,
    /// Resource governor bounds.
    #[serde(default)]
    pub governor: GovernorConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bounds for the daemon's resource governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Concurrent disk-heavy operations (dump, copy, bundle).
    #[serde(default = "default_io_permits")]
    pub io_permits: usize,
    /// Concurrent network operations (upload, credential fetch, heartbeat).
    #[serde(default = "default_network_permits")]
    pub network_permits: usize,
    /// Compressor worker threads; 0 means `min(cores, 4)`.
    #[serde(default)]
    pub cpu_workers: usize,
    /// Upload bandwidth cap in bytes per second; 0 means unlimited.
    #[serde(default)]
    pub upload_bandwidth_bytes_per_sec: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            io_permits: default_io_permits(),
            network_permits: default_network_permits(),
            cpu_workers: 0,
            upload_bandwidth_bytes_per_sec: 0,
        }
    }
}

impl GovernorConfig {
    /// Resolve the effective compressor thread count.
    pub fn effective_cpu_workers(&self) -> usize {
        if self.cpu_workers > 0 {
            self.cpu_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(4)
        }
    }
}

impl DaemonConfig {
    /// Load daemon configuration from TOML + `BACKHUBD`-prefixed env vars.
    pub fn load(path: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("BACKHUBD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

fn default_key_file() -> String {
    "/etc/backhub/node.key".to_string()
}

fn default_work_root() -> String {
    "/var/tmp/wp-backup-work".to_string()
}

fn default_web_root() -> String {
    "/var/www".to_string()
}

fn default_control_bind() -> String {
    "127.0.0.1:8790".to_string()
}

fn default_stats_interval() -> u64 {
    60
}

fn default_io_permits() -> usize {
    2
}

fn default_network_permits() -> usize {
    1
}
