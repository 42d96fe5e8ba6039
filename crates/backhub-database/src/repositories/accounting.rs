//! Transactional storage accounting.
//!
//! Post-flight accounting and deletion both touch three counters (site,
//! node, provider) plus a backup row; each operation commits atomically,
//! serialized per site by a `FOR UPDATE` row lock so concurrent
//! completions for the same site cannot interleave.

use chrono::Utc;
use sqlx::{PgConnection, PgPool};

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::result::AppResult;
use backhub_core::types::id::{BackupId, NodeId, SiteId};
use backhub_entity::backup::{Backup, BackupReport};

/// Repository for atomic usage accounting.
#[derive(Debug, Clone)]
pub struct AccountingRepository {
    pool: PgPool,
}

impl AccountingRepository {
    /// Create a new accounting repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> AppResult<sqlx::Transaction<'static, sqlx::Postgres>> {
        self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })
    }

    /// Lock a site row and return its owning node.
    async fn lock_site(conn: &mut PgConnection, site_id: SiteId) -> AppResult<NodeId> {
        sqlx::query_scalar::<_, NodeId>("SELECT node_id FROM sites WHERE id = $1 FOR UPDATE")
            .bind(site_id)
            .fetch_optional(conn)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to lock site", e))?
            .ok_or_else(|| AppError::not_found("Site not found"))
    }

    /// Record a successful backup report: insert the row and bump the
    /// site / node / provider counters, flagging quota breaches.
    ///
    /// Returns the inserted backup.
    pub async fn record_success(&self, report: &BackupReport) -> AppResult<Backup> {
        let mut tx = self.begin().await?;

        let node_id = Self::lock_site(&mut *tx, report.site_id).await?;

        let backup = sqlx::query_as::<_, Backup>(
            "INSERT INTO backups \
             (id, site_id, filename, size_bytes, object_path, provider_id, status, backup_type) \
             VALUES ($1, $2, $3, $4, $5, $6, 'success', 'full') RETURNING *",
        )
        .bind(BackupId::new())
        .bind(report.site_id)
        .bind(&report.filename)
        .bind(report.size_bytes)
        .bind(&report.object_path)
        .bind(report.provider_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to insert backup", e))?;

        sqlx::query(
            "UPDATE sites SET storage_used_bytes = storage_used_bytes + $2, \
             quota_exceeded_at = CASE \
                 WHEN storage_used_bytes + $2 > storage_quota_bytes \
                     THEN COALESCE(quota_exceeded_at, $3) \
                 ELSE NULL END \
             WHERE id = $1",
        )
        .bind(report.site_id)
        .bind(report.size_bytes)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to bump site usage", e))?;

        sqlx::query("UPDATE nodes SET storage_used_bytes = storage_used_bytes + $2 WHERE id = $1")
            .bind(node_id)
            .bind(report.size_bytes)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to bump node usage", e)
            })?;

        sqlx::query(
            "UPDATE storage_providers \
             SET storage_used_bytes = storage_used_bytes + $2 WHERE id = $1",
        )
        .bind(report.provider_id)
        .bind(report.size_bytes)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to bump provider usage", e)
        })?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit accounting", e)
        })?;

        Ok(backup)
    }

    /// Remove a backup from accounting: mark it deleted, drop its object
    /// path, and decrement the three counters, clearing the site's
    /// quota-exceeded marker once it is back under the cap.
    pub async fn apply_deletion(&self, backup: &Backup) -> AppResult<()> {
        let mut tx = self.begin().await?;

        let node_id = Self::lock_site(&mut *tx, backup.site_id).await?;

        let updated = sqlx::query(
            "UPDATE backups SET status = 'deleted', object_path = NULL, \
             scheduled_deletion = NULL WHERE id = $1 AND status = 'success'",
        )
        .bind(backup.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to mark deleted", e))?;

        // Someone else already deleted it; nothing to account for.
        if updated.rows_affected() == 0 {
            return Ok(());
        }

        sqlx::query(
            "UPDATE sites SET \
             storage_used_bytes = GREATEST(storage_used_bytes - $2, 0), \
             quota_exceeded_at = CASE \
                 WHEN GREATEST(storage_used_bytes - $2, 0) <= storage_quota_bytes THEN NULL \
                 ELSE quota_exceeded_at END \
             WHERE id = $1",
        )
        .bind(backup.site_id)
        .bind(backup.size_bytes)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to drop site usage", e))?;

        sqlx::query(
            "UPDATE nodes SET storage_used_bytes = GREATEST(storage_used_bytes - $2, 0) \
             WHERE id = $1",
        )
        .bind(node_id)
        .bind(backup.size_bytes)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to drop node usage", e))?;

        if let Some(provider_id) = backup.provider_id {
            sqlx::query(
                "UPDATE storage_providers \
                 SET storage_used_bytes = GREATEST(storage_used_bytes - $2, 0) WHERE id = $1",
            )
            .bind(provider_id)
            .bind(backup.size_bytes)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to drop provider usage", e)
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit deletion", e)
        })?;

        Ok(())
    }

    /// Exclude a lost backup from accounting: mark it failed and subtract
    /// its size from the counters. Used when reconciliation finds a row
    /// whose object disappeared.
    pub async fn exclude_lost(&self, backup: &Backup, reason: &str) -> AppResult<()> {
        let mut tx = self.begin().await?;

        let node_id = Self::lock_site(&mut *tx, backup.site_id).await?;

        let updated = sqlx::query(
            "UPDATE backups SET status = 'failed', error = $2, scheduled_deletion = NULL \
             WHERE id = $1 AND status = 'success'",
        )
        .bind(backup.id)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to mark lost", e))?;

        if updated.rows_affected() == 0 {
            return Ok(());
        }

        sqlx::query(
            "UPDATE sites SET \
             storage_used_bytes = GREATEST(storage_used_bytes - $2, 0), \
             quota_exceeded_at = CASE \
                 WHEN GREATEST(storage_used_bytes - $2, 0) <= storage_quota_bytes THEN NULL \
                 ELSE quota_exceeded_at END \
             WHERE id = $1",
        )
        .bind(backup.site_id)
        .bind(backup.size_bytes)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to drop site usage", e))?;

        sqlx::query(
            "UPDATE nodes SET storage_used_bytes = GREATEST(storage_used_bytes - $2, 0) \
             WHERE id = $1",
        )
        .bind(node_id)
        .bind(backup.size_bytes)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to drop node usage", e))?;

        tx.commit()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to commit", e))?;

        Ok(())
    }
}
