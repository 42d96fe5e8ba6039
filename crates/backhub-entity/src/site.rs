//! WordPress site entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use backhub_core::types::id::{NodeId, SiteId};

use crate::schedule::{Schedule, ScheduleFrequency};

/// One WordPress installation on a node.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Site {
    /// Unique site identifier; appears in object-store keys.
    pub id: SiteId,
    /// Owning node.
    pub node_id: NodeId,
    /// Human-readable site name. Never used in object-store keys.
    pub name: String,
    /// Absolute path of `wp-config.php` on the node.
    pub wp_config_path: String,
    /// Absolute path of `wp-content` on the node.
    pub wp_content_path: String,
    /// Explicit database name; falls back to wp-config parsing when null.
    pub db_name: Option<String>,
    /// Explicit database user.
    pub db_user: Option<String>,
    /// Sealed database password.
    #[serde(skip_serializing, default)]
    pub db_password_sealed: Option<String>,
    /// Database host, default `localhost`.
    pub db_host: Option<String>,
    /// Storage cap for this site.
    pub storage_quota_bytes: i64,
    /// Accounted bytes of live backups.
    pub storage_used_bytes: i64,
    /// First moment usage exceeded the quota; cleared when back under.
    pub quota_exceeded_at: Option<DateTime<Utc>>,
    /// Backup cadence.
    pub schedule_frequency: ScheduleFrequency,
    /// Local time of day, "HH:MM".
    pub schedule_time: String,
    /// CSV day mask for weekly/monthly schedules.
    pub schedule_days: Option<String>,
    /// Number of live backups retention keeps.
    pub retention_copies: i32,
    /// IANA zone the schedule is interpreted in.
    pub timezone: String,
    /// Next scheduled run, derived from the schedule.
    pub next_run_at: Option<DateTime<Utc>>,
    /// When the site was registered.
    pub created_at: DateTime<Utc>,
}

impl Site {
    /// Assemble the schedule spec from the flattened columns.
    pub fn schedule(&self) -> Schedule {
        Schedule {
            frequency: self.schedule_frequency,
            time: self.schedule_time.clone(),
            days: self.schedule_days.clone(),
            timezone: self.timezone.clone(),
        }
    }

    /// Remaining quota after current usage, never negative.
    pub fn remaining_quota_bytes(&self) -> i64 {
        (self.storage_quota_bytes - self.storage_used_bytes).max(0)
    }
}

/// A site discovered by the daemon's scanner, reported to the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredSite {
    /// Directory name of the installation.
    pub name: String,
    /// Path of the discovered `wp-config.php`.
    pub wp_config_path: String,
    /// Path of the `wp-content` directory.
    pub wp_content_path: String,
    /// Database name parsed from wp-config.php, if readable.
    pub db_name: Option<String>,
}
