//! Activity log repository implementation.

use sqlx::PgPool;

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::result::AppResult;
use backhub_core::types::id::{ActivityId, UserId};
use backhub_core::types::pagination::{PageRequest, PageResponse};
use backhub_entity::activity::{
    ActivityEntry, CreateActivityEntry, ACTIVITY_RETENTION_PER_ACTOR,
};

/// Repository for the append-only activity log.
#[derive(Debug, Clone)]
pub struct ActivityRepository {
    pool: PgPool,
}

impl ActivityRepository {
    /// Create a new activity repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an entry and prune the actor's history beyond the
    /// retention bound. Inserts are row-level; no cross-row locks.
    pub async fn create(&self, data: &CreateActivityEntry) -> AppResult<ActivityEntry> {
        let entry = sqlx::query_as::<_, ActivityEntry>(
            "INSERT INTO activity_log \
             (id, actor_id, action, target_type, target_id, target_name, ip_address, user_agent, details) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(ActivityId::new())
        .bind(data.actor_id)
        .bind(&data.action)
        .bind(&data.target_type)
        .bind(data.target_id)
        .bind(&data.target_name)
        .bind(&data.ip_address)
        .bind(&data.user_agent)
        .bind(&data.details)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create activity", e))?;

        if let Some(actor_id) = data.actor_id {
            self.prune_actor(actor_id).await?;
        }

        Ok(entry)
    }

    /// Keep only the most recent entries for one actor.
    async fn prune_actor(&self, actor_id: UserId) -> AppResult<()> {
        sqlx::query(
            "DELETE FROM activity_log WHERE actor_id = $1 AND id NOT IN ( \
                 SELECT id FROM activity_log WHERE actor_id = $1 \
                 ORDER BY created_at DESC LIMIT $2)",
        )
        .bind(actor_id)
        .bind(ACTIVITY_RETENTION_PER_ACTOR)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to prune activity", e))?;
        Ok(())
    }

    /// Search the log, newest first, optionally scoped to one actor.
    pub async fn search(
        &self,
        actor_id: Option<UserId>,
        action: Option<&str>,
        page: &PageRequest,
    ) -> AppResult<PageResponse<ActivityEntry>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM activity_log \
             WHERE ($1::uuid IS NULL OR actor_id = $1) AND ($2::text IS NULL OR action = $2)",
        )
        .bind(actor_id)
        .bind(action)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count activity", e))?;

        let entries = sqlx::query_as::<_, ActivityEntry>(
            "SELECT * FROM activity_log \
             WHERE ($1::uuid IS NULL OR actor_id = $1) AND ($2::text IS NULL OR action = $2) \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4",
        )
        .bind(actor_id)
        .bind(action)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to search activity", e))?;

        Ok(PageResponse::new(
            entries,
            page.page,
            page.page_size,
            total as u64,
        ))
    }
}
