//! Backup repository implementation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::result::AppResult;
use backhub_core::types::id::{BackupId, NodeId, SiteId};
use backhub_core::types::pagination::{PageRequest, PageResponse};
use backhub_entity::backup::{Backup, BackupRecordStatus};

/// Repository for backup records.
#[derive(Debug, Clone)]
pub struct BackupRepository {
    pool: PgPool,
}

impl BackupRepository {
    /// Create a new backup repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a backup by ID.
    pub async fn find_by_id(&self, id: BackupId) -> AppResult<Option<Backup>> {
        sqlx::query_as::<_, Backup>("SELECT * FROM backups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find backup", e))
    }

    /// List a site's backups, newest first.
    pub async fn find_by_site(
        &self,
        site_id: SiteId,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Backup>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM backups WHERE site_id = $1 AND status != 'deleted'",
        )
        .bind(site_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count backups", e))?;

        let backups = sqlx::query_as::<_, Backup>(
            "SELECT * FROM backups WHERE site_id = $1 AND status != 'deleted' \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(site_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list backups", e))?;

        Ok(PageResponse::new(
            backups,
            page.page,
            page.page_size,
            total as u64,
        ))
    }

    /// Size of a site's most recent successful backup, if any.
    pub async fn last_success_size(&self, site_id: SiteId) -> AppResult<Option<i64>> {
        sqlx::query_scalar(
            "SELECT size_bytes FROM backups WHERE site_id = $1 AND status = 'success' \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to read last backup size", e)
        })
    }

    /// Successful backups of a site, oldest first — retention's view.
    pub async fn find_success_oldest_first(&self, site_id: SiteId) -> AppResult<Vec<Backup>> {
        sqlx::query_as::<_, Backup>(
            "SELECT * FROM backups WHERE site_id = $1 AND status = 'success' \
             ORDER BY created_at ASC",
        )
        .bind(site_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to list successful backups", e)
        })
    }

    /// Successful backups under a node/site prefix — reconciliation's view.
    pub async fn find_success_for_node(&self, node_id: NodeId) -> AppResult<Vec<Backup>> {
        sqlx::query_as::<_, Backup>(
            "SELECT b.* FROM backups b JOIN sites s ON s.id = b.site_id \
             WHERE s.node_id = $1 AND b.status = 'success'",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to list node backups", e)
        })
    }

    /// Mark a set of backups for deletion at the given time.
    pub async fn schedule_deletion(
        &self,
        ids: &[BackupId],
        when: DateTime<Utc>,
    ) -> AppResult<u64> {
        let uuids: Vec<uuid::Uuid> = ids.iter().map(|id| id.into_uuid()).collect();
        let result = sqlx::query(
            "UPDATE backups SET scheduled_deletion = $2 \
             WHERE id = ANY($1) AND scheduled_deletion IS NULL",
        )
        .bind(&uuids)
        .bind(when)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to schedule deletions", e)
        })?;
        Ok(result.rows_affected())
    }

    /// Cancel a scheduled deletion. Returns the previous timestamp.
    pub async fn cancel_scheduled_deletion(
        &self,
        id: BackupId,
    ) -> AppResult<Option<DateTime<Utc>>> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            "UPDATE backups b SET scheduled_deletion = NULL \
             FROM (SELECT id, scheduled_deletion FROM backups WHERE id = $1 FOR UPDATE) old \
             WHERE b.id = old.id AND old.scheduled_deletion IS NOT NULL \
             RETURNING old.scheduled_deletion",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to cancel scheduled deletion", e)
        })
    }

    /// Backups past their scheduled deletion time.
    pub async fn find_due_deletions(&self, now: DateTime<Utc>) -> AppResult<Vec<Backup>> {
        sqlx::query_as::<_, Backup>(
            "SELECT * FROM backups WHERE scheduled_deletion IS NOT NULL \
             AND scheduled_deletion <= $1 AND status = 'success' \
             ORDER BY scheduled_deletion ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to list due deletions", e)
        })
    }

    /// All backups currently marked for deletion.
    pub async fn find_scheduled_deletions(&self) -> AppResult<Vec<Backup>> {
        sqlx::query_as::<_, Backup>(
            "SELECT * FROM backups WHERE scheduled_deletion IS NOT NULL \
             AND status = 'success' ORDER BY scheduled_deletion ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to list scheduled deletions", e)
        })
    }

    /// Flip a record's status, recording an error for failures.
    pub async fn update_status(
        &self,
        id: BackupId,
        status: BackupRecordStatus,
        error: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE backups SET status = $2, error = COALESCE($3, error) WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to update backup status", e)
            })?;
        Ok(())
    }
}
