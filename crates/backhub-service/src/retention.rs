//! Retention marking and the scheduled-deletion sweep.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_core::types::id::{BackupId, SiteId};
use backhub_database::repositories::accounting::AccountingRepository;
use backhub_database::repositories::backup::BackupRepository;
use backhub_database::repositories::site::SiteRepository;
use backhub_database::repositories::storage::StorageProviderRepository;
use backhub_entity::backup::Backup;

use crate::settings::SettingsService;
use crate::storage_access::StorageAccess;

/// Outcome of one deletion sweep pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Backups whose blob and accounting were removed.
    pub deleted: Vec<BackupId>,
    /// Backups whose blob deletion failed; left marked for retry.
    pub retried: Vec<BackupId>,
    /// Bytes released from accounting.
    pub freed_bytes: i64,
}

/// Marks excess backups for deletion and executes due deletions.
#[derive(Debug, Clone)]
pub struct RetentionService {
    backup_repo: Arc<BackupRepository>,
    site_repo: Arc<SiteRepository>,
    provider_repo: Arc<StorageProviderRepository>,
    accounting: Arc<AccountingRepository>,
    settings: Arc<SettingsService>,
    storage: Arc<StorageAccess>,
}

impl RetentionService {
    /// Create the retention service.
    pub fn new(
        backup_repo: Arc<BackupRepository>,
        site_repo: Arc<SiteRepository>,
        provider_repo: Arc<StorageProviderRepository>,
        accounting: Arc<AccountingRepository>,
        settings: Arc<SettingsService>,
        storage: Arc<StorageAccess>,
    ) -> Self {
        Self {
            backup_repo,
            site_repo,
            provider_repo,
            accounting,
            settings,
            storage,
        }
    }

    /// Mark the oldest successful backups in excess of the site's
    /// retention_copies with a deletion time of now + grace.
    ///
    /// Returns the ids that were newly marked. Already-marked rows keep
    /// their original deadline.
    pub async fn mark_excess(&self, site_id: SiteId) -> AppResult<Vec<BackupId>> {
        let site = self
            .site_repo
            .find_by_id(site_id)
            .await?
            .ok_or_else(|| AppError::not_found("Site not found"))?;

        let keep = site.retention_copies.max(0) as usize;
        let backups = self.backup_repo.find_success_oldest_first(site_id).await?;
        if backups.len() <= keep {
            return Ok(Vec::new());
        }

        let excess = backups.len() - keep;
        let victims: Vec<BackupId> = backups.iter().take(excess).map(|b| b.id).collect();

        let grace_days = self
            .settings
            .retention_grace_days(Some(site.node_id), Some(site_id))
            .await;
        let deadline = Utc::now() + Duration::days(grace_days);

        let marked = self
            .backup_repo
            .schedule_deletion(&victims, deadline)
            .await?;
        if marked > 0 {
            info!(
                site_id = %site_id,
                marked,
                deadline = %deadline,
                "Scheduled excess backups for deletion"
            );
        }
        Ok(victims)
    }

    /// Cancel a scheduled deletion, restoring the backup to plain
    /// SUCCESS accounting immediately.
    pub async fn cancel_scheduled(&self, backup_id: BackupId) -> AppResult<bool> {
        Ok(self
            .backup_repo
            .cancel_scheduled_deletion(backup_id)
            .await?
            .is_some())
    }

    /// Delete one backup now: blob first, then row + accounting.
    ///
    /// A blob failure leaves the row untouched so the sweep retries it.
    pub async fn delete_backup(&self, backup: &Backup) -> AppResult<()> {
        if let (Some(object_path), Some(provider_id)) = (&backup.object_path, backup.provider_id)
        {
            let provider = self
                .provider_repo
                .find_by_id(provider_id)
                .await?
                .ok_or_else(|| AppError::integrity("Backup references a missing provider"))?;
            let store = self.storage.open(&provider).await?;
            store.delete(object_path).await?;
        }
        self.accounting.apply_deletion(backup).await
    }

    /// Execute every deletion whose deadline has passed.
    pub async fn run_sweep(&self) -> AppResult<SweepReport> {
        let due = self.backup_repo.find_due_deletions(Utc::now()).await?;
        let mut report = SweepReport::default();

        for backup in due {
            match self.delete_backup(&backup).await {
                Ok(()) => {
                    report.freed_bytes += backup.size_bytes;
                    report.deleted.push(backup.id);
                }
                Err(e) => {
                    warn!(
                        backup_id = %backup.id,
                        error = %e,
                        "Blob deletion failed; row left for retry"
                    );
                    report.retried.push(backup.id);
                }
            }
        }

        if !report.deleted.is_empty() {
            info!(
                deleted = report.deleted.len(),
                freed_bytes = report.freed_bytes,
                "Deletion sweep complete"
            );
        }
        Ok(report)
    }

    /// Validity window for presigned restore downloads.
    pub fn download_link_ttl() -> StdDuration {
        StdDuration::from_secs(3600)
    }
}
