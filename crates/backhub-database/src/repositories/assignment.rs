//! RBAC assignment repository (user ↔ node, user ↔ site relations).

use sqlx::PgPool;

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::result::AppResult;
use backhub_core::types::id::{NodeId, SiteId, UserId};

/// Repository for the two M:N assignment relations driving RBAC filters.
#[derive(Debug, Clone)]
pub struct AssignmentRepository {
    pool: PgPool,
}

impl AssignmentRepository {
    /// Create a new assignment repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Assign a node to a user.
    pub async fn assign_node(&self, user_id: UserId, node_id: NodeId) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO user_nodes (user_id, node_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(node_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to assign node", e))?;
        Ok(())
    }

    /// Assign a site to a user.
    pub async fn assign_site(&self, user_id: UserId, site_id: SiteId) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO user_sites (user_id, site_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(site_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to assign site", e))?;
        Ok(())
    }

    /// Whether a node is in the user's assigned set.
    pub async fn is_node_assigned(&self, user_id: UserId, node_id: NodeId) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_nodes WHERE user_id = $1 AND node_id = $2",
        )
        .bind(user_id)
        .bind(node_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to check node assignment", e)
        })?;
        Ok(count > 0)
    }

    /// Whether a site is in the user's assigned set.
    pub async fn is_site_assigned(&self, user_id: UserId, site_id: SiteId) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_sites WHERE user_id = $1 AND site_id = $2",
        )
        .bind(user_id)
        .bind(site_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to check site assignment", e)
        })?;
        Ok(count > 0)
    }

    /// Whether the site sits on a node assigned to the user.
    pub async fn is_site_on_assigned_node(
        &self,
        user_id: UserId,
        site_id: SiteId,
    ) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sites s \
             JOIN user_nodes un ON un.node_id = s.node_id \
             WHERE un.user_id = $1 AND s.id = $2",
        )
        .bind(user_id)
        .bind(site_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to check node-scoped site", e)
        })?;
        Ok(count > 0)
    }
}
