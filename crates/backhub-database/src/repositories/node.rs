//! Node repository implementation.

use chrono::Utc;
use sqlx::PgPool;

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::result::AppResult;
use backhub_core::types::id::{NodeId, UserId};
use backhub_entity::node::{Node, NodeStatus};

/// Repository for managed-node persistence.
#[derive(Debug, Clone)]
pub struct NodeRepository {
    pool: PgPool,
}

impl NodeRepository {
    /// Create a new node repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a node by ID.
    pub async fn find_by_id(&self, id: NodeId) -> AppResult<Option<Node>> {
        sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find node", e))
    }

    /// Find a node by hostname.
    pub async fn find_by_hostname(&self, hostname: &str) -> AppResult<Option<Node>> {
        sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE hostname = $1 LIMIT 1")
            .bind(hostname)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find node by hostname", e)
            })
    }

    /// Find a pending node by its registration code.
    pub async fn find_pending_by_code(&self, code: &str) -> AppResult<Option<Node>> {
        sqlx::query_as::<_, Node>(
            "SELECT * FROM nodes WHERE registration_code = $1 AND status = 'pending'",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find node by code", e))
    }

    /// Find a node by its immutable join code.
    ///
    /// Status polls resolve through `join_code` so they keep working after
    /// approval clears the registration code. Codes can recur across the
    /// fleet's history; the latest row wins.
    pub async fn find_by_join_code(&self, code: &str) -> AppResult<Option<Node>> {
        sqlx::query_as::<_, Node>(
            "SELECT * FROM nodes WHERE join_code = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find node by code", e))
    }

    /// Find an active node by its API key hash.
    pub async fn find_active_by_key_hash(&self, hash: &str) -> AppResult<Option<Node>> {
        sqlx::query_as::<_, Node>(
            "SELECT * FROM nodes WHERE api_key_hash = $1 AND status = 'active'",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find node by key", e))
    }

    /// List all nodes.
    pub async fn find_all(&self) -> AppResult<Vec<Node>> {
        sqlx::query_as::<_, Node>("SELECT * FROM nodes ORDER BY hostname ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list nodes", e))
    }

    /// List nodes assigned to a user.
    pub async fn find_assigned(&self, user_id: UserId) -> AppResult<Vec<Node>> {
        sqlx::query_as::<_, Node>(
            "SELECT n.* FROM nodes n \
             JOIN user_nodes un ON un.node_id = n.id \
             WHERE un.user_id = $1 ORDER BY n.hostname ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list assigned nodes", e))
    }

    /// Record a new pending node for a join request.
    pub async fn create_pending(&self, node: &Node) -> AppResult<Node> {
        sqlx::query_as::<_, Node>(
            "INSERT INTO nodes \
             (id, hostname, address, status, registration_code, join_code, storage_quota_bytes) \
             VALUES ($1, $2, $3, 'pending', $4, $4, $5) RETURNING *",
        )
        .bind(node.id)
        .bind(&node.hostname)
        .bind(&node.address)
        .bind(&node.registration_code)
        .bind(node.storage_quota_bytes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create node", e))
    }

    /// Approve a pending node in one statement: activate, store the key
    /// hash, park the plaintext in the one-shot slot, clear the code.
    pub async fn approve(
        &self,
        id: NodeId,
        key_hash: &str,
        key_plain: &str,
        address: Option<&str>,
    ) -> AppResult<Option<Node>> {
        sqlx::query_as::<_, Node>(
            "UPDATE nodes SET status = 'active', api_key_hash = $2, api_key_plain = $3, \
             registration_code = NULL, address = COALESCE($4, address), last_seen_at = NOW() \
             WHERE id = $1 AND status = 'pending' RETURNING *",
        )
        .bind(id)
        .bind(key_hash)
        .bind(key_plain)
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to approve node", e))
    }

    /// Atomically consume the one-shot plaintext key slot.
    ///
    /// The first caller gets the key; every later call sees NULL. The
    /// self-join pins the pre-update row so RETURNING can expose the old
    /// value.
    pub async fn take_api_key(&self, id: NodeId) -> AppResult<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "UPDATE nodes n SET api_key_plain = NULL \
             FROM (SELECT id, api_key_plain FROM nodes WHERE id = $1 FOR UPDATE) old \
             WHERE n.id = old.id AND old.api_key_plain IS NOT NULL \
             RETURNING old.api_key_plain",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to take API key", e))
    }

    /// Update a node's lifecycle status.
    pub async fn update_status(&self, id: NodeId, status: NodeStatus) -> AppResult<()> {
        sqlx::query("UPDATE nodes SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to update node status", e)
            })?;
        Ok(())
    }

    /// Update a node's storage quota.
    pub async fn update_quota(&self, id: NodeId, quota_bytes: i64) -> AppResult<()> {
        sqlx::query("UPDATE nodes SET storage_quota_bytes = $2 WHERE id = $1")
            .bind(id)
            .bind(quota_bytes)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to update node quota", e)
            })?;
        Ok(())
    }

    /// Record a heartbeat or authenticated request.
    pub async fn touch_last_seen(&self, id: NodeId) -> AppResult<()> {
        sqlx::query("UPDATE nodes SET last_seen_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to touch node", e))?;
        Ok(())
    }

    /// Overwrite accounted usage (reconciliation only).
    pub async fn set_used_bytes(&self, id: NodeId, used_bytes: i64) -> AppResult<()> {
        sqlx::query("UPDATE nodes SET storage_used_bytes = $2 WHERE id = $1")
            .bind(id)
            .bind(used_bytes.max(0))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to set node usage", e)
            })?;
        Ok(())
    }
}
