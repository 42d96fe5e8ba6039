//! Unsealing provider credentials into short-lived object-store clients.

use std::sync::Arc;

use tracing::info;

use backhub_auth::seal::CredentialSeal;
use backhub_core::result::AppResult;
use backhub_database::repositories::storage::StorageProviderRepository;
use backhub_entity::provider::{ProviderCredentials, StorageProvider};
use backhub_storage::{ObjectStore, open_store};

/// Opens object stores from sealed provider records.
///
/// Plaintext credentials exist only inside the returned client; records
/// sealed under a rotated-out key generation are re-sealed here on the
/// way through.
#[derive(Debug, Clone)]
pub struct StorageAccess {
    seal: Arc<CredentialSeal>,
    provider_repo: Arc<StorageProviderRepository>,
}

impl StorageAccess {
    /// Create the storage access helper.
    pub fn new(seal: Arc<CredentialSeal>, provider_repo: Arc<StorageProviderRepository>) -> Self {
        Self {
            seal,
            provider_repo,
        }
    }

    /// Unseal a provider's credentials.
    pub async fn unseal(&self, provider: &StorageProvider) -> AppResult<ProviderCredentials> {
        let access = self.seal.unseal(&provider.access_key_sealed)?;
        let secret = self.seal.unseal(&provider.secret_key_sealed)?;

        // Lazy re-encryption after key rotation.
        if access.needs_reseal || secret.needs_reseal {
            let access_sealed = self.seal.seal(&access.plaintext)?;
            let secret_sealed = self.seal.seal(&secret.plaintext)?;
            self.provider_repo
                .update_sealed_credentials(provider.id, &access_sealed, &secret_sealed)
                .await?;
            info!(provider_id = %provider.id, "Re-sealed credentials under current key");
        }

        Ok(ProviderCredentials {
            provider_id: provider.id,
            kind: provider.kind,
            endpoint: provider.endpoint.clone(),
            region: provider.region.clone(),
            bucket: provider.bucket.clone(),
            access_key: access.plaintext,
            secret_key: secret.plaintext,
        })
    }

    /// Unseal and open a store for one operation.
    pub async fn open(&self, provider: &StorageProvider) -> AppResult<Arc<dyn ObjectStore>> {
        let creds = self.unseal(provider).await?;
        open_store(&creds).await
    }
}
