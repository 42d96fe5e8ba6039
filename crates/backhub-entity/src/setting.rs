//! Tiered settings entity.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Scope a setting applies to. Resolution is most-specific-wins:
/// site overrides node overrides global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "setting_scope", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SettingScope {
    /// Fleet-wide default.
    Global,
    /// Applies to one node and its sites.
    Node,
    /// Applies to one site.
    Site,
}

impl SettingScope {
    /// Return the scope as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Node => "node",
            Self::Site => "site",
        }
    }
}

impl fmt::Display for SettingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Well-known setting keys.
pub mod keys {
    /// Days between a retention mark and actual deletion.
    pub const RETENTION_GRACE_DAYS: &str = "retention_grace_days";
    /// Relative drift above which reconciliation rewrites usage counters.
    pub const RECONCILE_DRIFT_THRESHOLD: &str = "reconcile_drift_threshold";
}

/// A single scoped configuration value.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Setting {
    /// Scope level.
    pub scope: SettingScope,
    /// Node or site id for scoped values; the nil UUID for global.
    pub scope_id: Uuid,
    /// Setting key.
    pub key: String,
    /// JSON value.
    pub value: serde_json::Value,
}
