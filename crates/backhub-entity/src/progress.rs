//! Per-site live backup progress row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use backhub_core::types::id::SiteId;

/// State of a site's current (or most recent) backup job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "backup_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BackupState {
    /// No job has run since the row was last reset.
    Idle,
    /// A job is executing stages.
    Running,
    /// The last job finished every stage.
    Completed,
    /// The last job failed.
    Failed,
    /// The last job was cancelled cooperatively.
    Stopped,
}

impl BackupState {
    /// Terminal states are sticky until the next start.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Return the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The single live status row every site owns.
///
/// Writers carry the epoch they were issued at job start; the store drops
/// writes from prior epochs so a zombie job can never clobber the row of a
/// freshly started one. Readers always receive the row as one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProgressRow {
    /// Site this row describes.
    pub site_id: SiteId,
    /// Monotonically increasing job generation.
    pub epoch: i64,
    /// Current state.
    pub state: BackupState,
    /// Overall completion in [0, 100].
    pub progress_percent: i16,
    /// Name of the running (or last) stage.
    pub stage: Option<String>,
    /// Human-readable status line.
    pub message: Option<String>,
    /// Bytes processed by the current stage.
    pub bytes_processed: i64,
    /// Total bytes the current stage expects, when known.
    pub bytes_total: i64,
    /// Terminal error message.
    pub error: Option<String>,
    /// Cooperative cancellation flag.
    pub stop_requested: bool,
    /// When the current job started.
    pub started_at: Option<DateTime<Utc>>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl ProgressRow {
    /// A fresh idle row for a site that has never run a backup.
    pub fn idle(site_id: SiteId) -> Self {
        Self {
            site_id,
            epoch: 0,
            state: BackupState::Idle,
            progress_percent: 0,
            stage: None,
            message: None,
            bytes_processed: 0,
            bytes_total: 0,
            error: None,
            stop_requested: false,
            started_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Incremental patch a pipeline applies to its site's progress row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressPatch {
    /// New overall percentage.
    pub progress_percent: Option<i16>,
    /// New stage name.
    pub stage: Option<String>,
    /// New status line.
    pub message: Option<String>,
    /// Bytes processed by the current stage.
    pub bytes_processed: Option<i64>,
    /// Total bytes the current stage expects.
    pub bytes_total: Option<i64>,
}

/// Terminal outcome reported by a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressOutcome {
    /// Completed, Failed or Stopped.
    pub state: BackupState,
    /// Final status line.
    pub message: Option<String>,
    /// Terminal error, for Failed outcomes.
    pub error: Option<String>,
}
