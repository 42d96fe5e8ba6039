//! Storage provider repository implementation.

use sqlx::PgPool;

use backhub_core::error::{AppError, ErrorKind};
use backhub_core::result::AppResult;
use backhub_core::types::id::ProviderId;
use backhub_entity::provider::StorageProvider;

/// Repository for storage provider persistence.
#[derive(Debug, Clone)]
pub struct StorageProviderRepository {
    pool: PgPool,
}

impl StorageProviderRepository {
    /// Create a new storage provider repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a provider by ID.
    pub async fn find_by_id(&self, id: ProviderId) -> AppResult<Option<StorageProvider>> {
        sqlx::query_as::<_, StorageProvider>("SELECT * FROM storage_providers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find provider", e))
    }

    /// Find the active default provider.
    pub async fn find_default(&self) -> AppResult<Option<StorageProvider>> {
        sqlx::query_as::<_, StorageProvider>(
            "SELECT * FROM storage_providers WHERE is_default AND is_active LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to find default provider", e)
        })
    }

    /// List all providers.
    pub async fn find_all(&self) -> AppResult<Vec<StorageProvider>> {
        sqlx::query_as::<_, StorageProvider>(
            "SELECT * FROM storage_providers ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list providers", e))
    }

    /// Create a provider. Making it the default demotes the previous one
    /// inside the same transaction.
    pub async fn create(&self, provider: &StorageProvider) -> AppResult<StorageProvider> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })?;

        if provider.is_default {
            sqlx::query("UPDATE storage_providers SET is_default = FALSE WHERE is_default")
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to demote default", e)
                })?;
        }

        let created = sqlx::query_as::<_, StorageProvider>(
            "INSERT INTO storage_providers \
             (id, name, kind, endpoint, region, bucket, access_key_sealed, secret_key_sealed, \
              storage_limit_bytes, is_default, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
        )
        .bind(provider.id)
        .bind(&provider.name)
        .bind(provider.kind)
        .bind(&provider.endpoint)
        .bind(&provider.region)
        .bind(&provider.bucket)
        .bind(&provider.access_key_sealed)
        .bind(&provider.secret_key_sealed)
        .bind(provider.storage_limit_bytes)
        .bind(provider.is_default)
        .bind(provider.is_active)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create provider", e))?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit provider", e)
        })?;

        Ok(created)
    }

    /// Re-seal credentials after a lazy key-rotation re-encrypt.
    pub async fn update_sealed_credentials(
        &self,
        id: ProviderId,
        access_key_sealed: &str,
        secret_key_sealed: &str,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE storage_providers SET access_key_sealed = $2, secret_key_sealed = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(access_key_sealed)
        .bind(secret_key_sealed)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to reseal credentials", e)
        })?;
        Ok(())
    }

    /// Overwrite accounted usage (reconciliation only).
    pub async fn set_used_bytes(&self, id: ProviderId, used_bytes: i64) -> AppResult<()> {
        sqlx::query("UPDATE storage_providers SET storage_used_bytes = $2 WHERE id = $1")
            .bind(id)
            .bind(used_bytes.max(0))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to set provider usage", e)
            })?;
        Ok(())
    }
}
