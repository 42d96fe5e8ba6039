//! Tiered settings repository.

use sqlx::PgPool;
use uuid::Uuid;

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::result::AppResult;
use backhub_core::types::id::{NodeId, SiteId};
use backhub_entity::setting::{Setting, SettingScope};

/// Repository for scoped settings with most-specific-wins resolution.
#[derive(Debug, Clone)]
pub struct SettingRepository {
    pool: PgPool,
}

impl SettingRepository {
    /// Create a new setting repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store a setting at a scope.
    pub async fn upsert(&self, setting: &Setting) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO settings (scope, scope_id, key, value) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (scope, scope_id, key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(setting.scope)
        .bind(setting.scope_id)
        .bind(&setting.key)
        .bind(&setting.value)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to upsert setting", e))?;
        Ok(())
    }

    /// Resolve a key for a site: site value, else its node's, else global.
    pub async fn resolve(
        &self,
        key: &str,
        node_id: Option<NodeId>,
        site_id: Option<SiteId>,
    ) -> AppResult<Option<serde_json::Value>> {
        let value: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT value FROM settings WHERE key = $1 AND ( \
                 (scope = 'site' AND scope_id = $3) OR \
                 (scope = 'node' AND scope_id = $2) OR \
                 (scope = 'global' AND scope_id = $4)) \
             ORDER BY CASE scope \
                 WHEN 'site' THEN 0 WHEN 'node' THEN 1 ELSE 2 END \
             LIMIT 1",
        )
        .bind(key)
        .bind(node_id.map(NodeId::into_uuid).unwrap_or(Uuid::nil()))
        .bind(site_id.map(SiteId::into_uuid).unwrap_or(Uuid::nil()))
        .bind(Uuid::nil())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to resolve setting", e))?;
        Ok(value)
    }
}
