//! Persisted progress row repository.
//!
//! The authoritative copy of each site's live row is the in-memory store
//! in `backhub-progress`; this repository is its write-through backing so
//! terminal states survive master restarts.

use chrono::{Duration, Utc};
use sqlx::PgPool;

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::result::AppResult;
use backhub_core::types::id::SiteId;
use backhub_entity::progress::ProgressRow;

/// Repository for the `backup_status` table.
#[derive(Debug, Clone)]
pub struct ProgressRepository {
    pool: PgPool,
}

impl ProgressRepository {
    /// Create a new progress repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write a full snapshot of a site's row.
    pub async fn upsert(&self, row: &ProgressRow) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO backup_status \
             (site_id, epoch, state, progress_percent, stage, message, bytes_processed, \
              bytes_total, error, stop_requested, started_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (site_id) DO UPDATE SET \
                 epoch = EXCLUDED.epoch, state = EXCLUDED.state, \
                 progress_percent = EXCLUDED.progress_percent, stage = EXCLUDED.stage, \
                 message = EXCLUDED.message, bytes_processed = EXCLUDED.bytes_processed, \
                 bytes_total = EXCLUDED.bytes_total, error = EXCLUDED.error, \
                 stop_requested = EXCLUDED.stop_requested, started_at = EXCLUDED.started_at, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(row.site_id)
        .bind(row.epoch)
        .bind(row.state)
        .bind(row.progress_percent)
        .bind(&row.stage)
        .bind(&row.message)
        .bind(row.bytes_processed)
        .bind(row.bytes_total)
        .bind(&row.error)
        .bind(row.stop_requested)
        .bind(row.started_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to upsert progress", e))?;
        Ok(())
    }

    /// Load every persisted row (store hydration on boot).
    pub async fn find_all(&self) -> AppResult<Vec<ProgressRow>> {
        sqlx::query_as::<_, ProgressRow>("SELECT * FROM backup_status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to load progress rows", e)
            })
    }

    /// RUNNING rows whose last update is older than the grace period.
    pub async fn find_stale_running(&self, grace_minutes: i64) -> AppResult<Vec<ProgressRow>> {
        let cutoff = Utc::now() - Duration::minutes(grace_minutes);
        sqlx::query_as::<_, ProgressRow>(
            "SELECT * FROM backup_status WHERE state = 'running' AND updated_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to find stale progress rows", e)
        })
    }

    /// Fetch one site's persisted row.
    pub async fn find_by_site(&self, site_id: SiteId) -> AppResult<Option<ProgressRow>> {
        sqlx::query_as::<_, ProgressRow>("SELECT * FROM backup_status WHERE site_id = $1")
            .bind(site_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find progress row", e)
            })
    }
}
