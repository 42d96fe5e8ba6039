//! Quota projections and post-flight accounting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use backhub_core::config::QuotaConfig;
use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_core::types::id::SiteId;
use backhub_database::repositories::accounting::AccountingRepository;
use backhub_database::repositories::backup::BackupRepository;
use backhub_database::repositories::node::NodeRepository;
use backhub_database::repositories::site::SiteRepository;
use backhub_entity::backup::{Backup, BackupReport};

use crate::retention::RetentionService;

/// Which bound a projection would exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaBound {
    /// The site's own quota.
    Site,
    /// The owning node's quota.
    Node,
}

/// Result of a pre-flight quota check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaCheck {
    /// Whether the backup may proceed.
    pub can_proceed: bool,
    /// Estimated backup size used for the projection.
    pub estimated_bytes: i64,
    /// Site usage if the backup lands at the estimated size.
    pub projected_site_used: i64,
    /// Node usage if the backup lands at the estimated size.
    pub projected_node_used: i64,
    /// The site's quota.
    pub site_quota_bytes: i64,
    /// The node's quota.
    pub node_quota_bytes: i64,
    /// Which bound would be exceeded, if any.
    pub exceeded: Option<QuotaBound>,
    /// Human-readable warning when `can_proceed` is false.
    pub warning: Option<String>,
}

/// Result of validating a quota change against the node's remainder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaUpdateCheck {
    /// Whether the new quota fits.
    pub valid: bool,
    /// Largest quota that would fit.
    pub max_allowed_bytes: i64,
    /// Why the update was rejected.
    pub error: Option<String>,
}

/// The quota engine: pre-flight projection and post-flight accounting.
#[derive(Debug, Clone)]
pub struct QuotaService {
    site_repo: Arc<SiteRepository>,
    node_repo: Arc<NodeRepository>,
    backup_repo: Arc<BackupRepository>,
    accounting: Arc<AccountingRepository>,
    retention: Arc<RetentionService>,
    config: QuotaConfig,
}

impl QuotaService {
    /// Create the quota service.
    pub fn new(
        site_repo: Arc<SiteRepository>,
        node_repo: Arc<NodeRepository>,
        backup_repo: Arc<BackupRepository>,
        accounting: Arc<AccountingRepository>,
        retention: Arc<RetentionService>,
        config: QuotaConfig,
    ) -> Self {
        Self {
            site_repo,
            node_repo,
            backup_repo,
            accounting,
            retention,
            config,
        }
    }

    /// Pre-flight check: project site and node usage with an estimated
    /// backup size and report which bound, if any, would be exceeded.
    ///
    /// The estimate is, in order: the supplied value, the site's last
    /// successful backup size, the configured default.
    pub async fn preflight(
        &self,
        site_id: SiteId,
        estimated_bytes: Option<i64>,
    ) -> AppResult<QuotaCheck> {
        let site = self
            .site_repo
            .find_by_id(site_id)
            .await?
            .ok_or_else(|| AppError::not_found("Site not found"))?;
        let node = self
            .node_repo
            .find_by_id(site.node_id)
            .await?
            .ok_or_else(|| AppError::integrity("Site references a missing node"))?;

        let estimate = match estimated_bytes {
            Some(e) if e > 0 => e,
            _ => self
                .backup_repo
                .last_success_size(site_id)
                .await?
                .unwrap_or(self.config.default_estimate_bytes),
        };

        let projected_site_used = site.storage_used_bytes + estimate;
        let projected_node_used = node.storage_used_bytes - site.storage_used_bytes
            + projected_site_used;

        let exceeded = if projected_site_used > site.storage_quota_bytes {
            Some(QuotaBound::Site)
        } else if projected_node_used > node.storage_quota_bytes {
            Some(QuotaBound::Node)
        } else {
            None
        };

        let warning = exceeded.map(|bound| match bound {
            QuotaBound::Site => "would exceed site quota".to_string(),
            QuotaBound::Node => "would exceed node quota".to_string(),
        });

        Ok(QuotaCheck {
            can_proceed: exceeded.is_none(),
            estimated_bytes: estimate,
            projected_site_used,
            projected_node_used,
            site_quota_bytes: site.storage_quota_bytes,
            node_quota_bytes: node.storage_quota_bytes,
            exceeded,
            warning,
        })
    }

    /// Validate a site quota change against the node's remainder: the sum
    /// of all site quotas on a node may not exceed the node's quota.
    pub async fn validate_site_quota_update(
        &self,
        site_id: SiteId,
        new_quota_bytes: i64,
    ) -> AppResult<QuotaUpdateCheck> {
        let site = self
            .site_repo
            .find_by_id(site_id)
            .await?
            .ok_or_else(|| AppError::not_found("Site not found"))?;
        let node = self
            .node_repo
            .find_by_id(site.node_id)
            .await?
            .ok_or_else(|| AppError::integrity("Site references a missing node"))?;

        let other_sites_quota = self
            .site_repo
            .sum_quota_on_node(site.node_id, Some(site_id))
            .await?;
        let max_allowed = (node.storage_quota_bytes - other_sites_quota).max(0);

        if new_quota_bytes > max_allowed {
            return Ok(QuotaUpdateCheck {
                valid: false,
                max_allowed_bytes: max_allowed,
                error: Some(format!(
                    "Total site quotas would exceed the node limit; at most {max_allowed} bytes available"
                )),
            });
        }

        Ok(QuotaUpdateCheck {
            valid: true,
            max_allowed_bytes: max_allowed,
            error: None,
        })
    }

    /// Apply a validated quota change.
    pub async fn update_site_quota(&self, site_id: SiteId, new_quota_bytes: i64) -> AppResult<()> {
        let check = self.validate_site_quota_update(site_id, new_quota_bytes).await?;
        if !check.valid {
            return Err(AppError::validation(
                check.error.unwrap_or_else(|| "Quota too large".to_string()),
            ));
        }
        self.site_repo.update_quota(site_id, new_quota_bytes).await
    }

    /// Post-flight accounting for a successful backup report:
    /// insert + counter bumps commit atomically, then retention marks any
    /// backups now in excess of the site's retention_copies.
    pub async fn record_success(&self, report: &BackupReport) -> AppResult<Backup> {
        let backup = self.accounting.record_success(report).await?;
        info!(
            site_id = %report.site_id,
            filename = %report.filename,
            size_bytes = report.size_bytes,
            "Recorded successful backup"
        );

        // Retention marking is best-effort here; the nightly sweep would
        // catch up if this fails.
        if let Err(e) = self.retention.mark_excess(report.site_id).await {
            warn!(site_id = %report.site_id, error = %e, "Retention marking failed");
        }

        Ok(backup)
    }
}
