//! Logging configuration.

use serde::{Deserialize, Serialize};

/// Logging settings shared by master and daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Console format: `pretty` or `json`.
    #[serde(default = "default_format")]
    pub format: String,
    /// Directory for the rolling file logs. Empty disables file logging.
    #[serde(default)]
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            directory: String::new(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}
