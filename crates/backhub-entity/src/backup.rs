//! Backup record entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use backhub_core::types::id::{BackupId, ProviderId, SiteId};

/// Lifecycle status of a backup record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "backup_record_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BackupRecordStatus {
    /// Pipeline in flight; row exists for bookkeeping only.
    Running,
    /// Archive verified present at `object_path`; counted in usage.
    Success,
    /// Pipeline failed or blob lost; excluded from usage accounting.
    Failed,
    /// Blob and accounting removed; row kept for history.
    Deleted,
}

impl BackupRecordStatus {
    /// Whether this record contributes to storage accounting.
    pub fn counts_toward_usage(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for BackupRecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single archived backup of a site.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Backup {
    /// Unique backup identifier.
    pub id: BackupId,
    /// Site this backup belongs to.
    pub site_id: SiteId,
    /// Archive file name, `{site_name}_{YYYYMMDD}_{HHMMSS}.tar.zst`.
    pub filename: String,
    /// Archive size in bytes.
    pub size_bytes: i64,
    /// Object-store key: `{node_uuid}/{site_uuid}/{filename}`.
    pub object_path: Option<String>,
    /// Provider the archive was uploaded to.
    pub provider_id: Option<ProviderId>,
    /// Record status.
    pub status: BackupRecordStatus,
    /// When the retention sweep may delete this backup.
    pub scheduled_deletion: Option<DateTime<Utc>>,
    /// Backup flavour; only full backups are produced.
    pub backup_type: String,
    /// Terminal error message, if any.
    pub error: Option<String>,
    /// When the backup completed (or failed).
    pub created_at: DateTime<Utc>,
}

/// Completion report a node sends after a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupReport {
    /// Site the backup ran for.
    pub site_id: SiteId,
    /// Archive file name.
    pub filename: String,
    /// Final archive size in bytes.
    pub size_bytes: i64,
    /// Object-store key of the uploaded archive.
    pub object_path: String,
    /// Provider the archive landed on.
    pub provider_id: ProviderId,
}
