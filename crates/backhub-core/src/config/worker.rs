//! Background worker configuration (master side).

use serde::{Deserialize, Serialize};

/// Settings for the master's periodic jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Cron expression for the scheduled-deletion sweep.
    #[serde(default = "default_deletion_cron")]
    pub deletion_sweep_cron: String,
    /// Cron expression for the nightly storage reconciliation.
    #[serde(default = "default_reconcile_cron")]
    pub reconcile_cron: String,
    /// Cron expression for the stale-progress sweep.
    #[serde(default = "default_stale_cron")]
    pub stale_sweep_cron: String,
    /// Minutes after which a RUNNING progress row with no updates is
    /// considered abandoned.
    #[serde(default = "default_stale_minutes")]
    pub stale_running_minutes: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            deletion_sweep_cron: default_deletion_cron(),
            reconcile_cron: default_reconcile_cron(),
            stale_sweep_cron: default_stale_cron(),
            stale_running_minutes: default_stale_minutes(),
        }
    }
}

fn default_deletion_cron() -> String {
    // Every 15 minutes.
    "0 */15 * * * *".to_string()
}

fn default_reconcile_cron() -> String {
    // Nightly at 03:30.
    "0 30 3 * * *".to_string()
}

fn default_stale_cron() -> String {
    // Every 10 minutes.
    "0 */10 * * * *".to_string()
}

fn default_stale_minutes() -> i64 {
    // Matches the longest stage timeout (upload, 6 h).
    360
}
