//! Site repository implementation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::result::AppResult;
use backhub_core::types::id::{NodeId, SiteId, UserId};
use backhub_entity::site::{DiscoveredSite, Site};

/// Repository for WordPress site persistence.
#[derive(Debug, Clone)]
pub struct SiteRepository {
    pool: PgPool,
}

impl SiteRepository {
    /// Create a new site repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a site by ID.
    pub async fn find_by_id(&self, id: SiteId) -> AppResult<Option<Site>> {
        sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find site", e))
    }

    /// List all sites.
    pub async fn find_all(&self) -> AppResult<Vec<Site>> {
        sqlx::query_as::<_, Site>("SELECT * FROM sites ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list sites", e))
    }

    /// List sites on a node.
    pub async fn find_by_node(&self, node_id: NodeId) -> AppResult<Vec<Site>> {
        sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE node_id = $1 ORDER BY name ASC")
            .bind(node_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to list sites on node", e)
            })
    }

    /// List sites on any node assigned to a user (node-admin scope).
    pub async fn find_on_assigned_nodes(&self, user_id: UserId) -> AppResult<Vec<Site>> {
        sqlx::query_as::<_, Site>(
            "SELECT s.* FROM sites s \
             JOIN user_nodes un ON un.node_id = s.node_id \
             WHERE un.user_id = $1 ORDER BY s.name ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list scoped sites", e))
    }

    /// List sites directly assigned to a user (site-admin scope).
    pub async fn find_assigned(&self, user_id: UserId) -> AppResult<Vec<Site>> {
        sqlx::query_as::<_, Site>(
            "SELECT s.* FROM sites s \
             JOIN user_sites us ON us.site_id = s.id \
             WHERE us.user_id = $1 ORDER BY s.name ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list assigned sites", e))
    }

    /// Register a site discovered by a node's scanner, keyed on the
    /// wp-config path; rescans refresh the metadata without resetting
    /// quotas or schedules.
    pub async fn upsert_discovered(
        &self,
        node_id: NodeId,
        site: &DiscoveredSite,
        default_quota_bytes: i64,
    ) -> AppResult<Site> {
        sqlx::query_as::<_, Site>(
            "INSERT INTO sites \
             (id, node_id, name, wp_config_path, wp_content_path, db_name, storage_quota_bytes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (node_id, wp_config_path) DO UPDATE \
             SET name = EXCLUDED.name, wp_content_path = EXCLUDED.wp_content_path, \
                 db_name = COALESCE(sites.db_name, EXCLUDED.db_name) \
             RETURNING *",
        )
        .bind(SiteId::new())
        .bind(node_id)
        .bind(&site.name)
        .bind(&site.wp_config_path)
        .bind(&site.wp_content_path)
        .bind(&site.db_name)
        .bind(default_quota_bytes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to upsert site", e))
    }

    /// Sum of quotas of all sites on a node, optionally excluding one site.
    pub async fn sum_quota_on_node(
        &self,
        node_id: NodeId,
        exclude: Option<SiteId>,
    ) -> AppResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(storage_quota_bytes) FROM sites \
             WHERE node_id = $1 AND ($2::uuid IS NULL OR id != $2)",
        )
        .bind(node_id)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to sum site quotas", e))?;
        Ok(total.unwrap_or(0))
    }

    /// Update a site's storage quota.
    pub async fn update_quota(&self, id: SiteId, quota_bytes: i64) -> AppResult<()> {
        sqlx::query("UPDATE sites SET storage_quota_bytes = $2 WHERE id = $1")
            .bind(id)
            .bind(quota_bytes)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to update site quota", e)
            })?;
        Ok(())
    }

    /// Persist the derived next scheduled run.
    pub async fn update_next_run(
        &self,
        id: SiteId,
        next_run_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE sites SET next_run_at = $2 WHERE id = $1")
            .bind(id)
            .bind(next_run_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to update next run", e)
            })?;
        Ok(())
    }

    /// Overwrite accounted usage (reconciliation only), adjusting the
    /// quota-exceeded marker to match.
    pub async fn set_used_bytes(&self, id: SiteId, used_bytes: i64) -> AppResult<()> {
        sqlx::query(
            "UPDATE sites SET storage_used_bytes = $2, \
             quota_exceeded_at = CASE \
                 WHEN $2 > storage_quota_bytes THEN COALESCE(quota_exceeded_at, NOW()) \
                 ELSE NULL END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(used_bytes.max(0))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to set site usage", e))?;
        Ok(())
    }
}
