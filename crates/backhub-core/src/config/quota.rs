//! Quota and retention configuration.

use serde::{Deserialize, Serialize};

/// Quota engine and retention defaults.
///
/// These are fleet-wide fallbacks; the tiered settings store can override
/// them per node or per site (most-specific wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Slack above a node's quota that lets in-flight uploads complete
    /// before refusal kicks in.
    #[serde(default = "default_tolerance")]
    pub node_tolerance_bytes: i64,
    /// Estimated backup size when a site has no history and none is supplied.
    #[serde(default = "default_estimate")]
    pub default_estimate_bytes: i64,
    /// Days between a retention mark and actual deletion.
    #[serde(default = "default_grace_days")]
    pub retention_grace_days: i64,
    /// Relative drift above which reconciliation rewrites usage counters.
    #[serde(default = "default_drift_threshold")]
    pub reconcile_drift_threshold: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            node_tolerance_bytes: default_tolerance(),
            default_estimate_bytes: default_estimate(),
            retention_grace_days: default_grace_days(),
            reconcile_drift_threshold: default_drift_threshold(),
        }
    }
}

fn default_tolerance() -> i64 {
    // 1 GiB of slack for uploads already past their pre-flight check.
    1024 * 1024 * 1024
}

fn default_estimate() -> i64 {
    1024 * 1024 * 1024
}

fn default_grace_days() -> i64 {
    7
}

fn default_drift_threshold() -> f64 {
    0.01
}
