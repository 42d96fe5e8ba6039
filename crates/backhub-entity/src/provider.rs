//! Storage provider entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use backhub_core::types::id::ProviderId;

/// Kind of object store backing a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "provider_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any S3-compatible endpoint.
    S3,
    /// Local filesystem (testing and single-box deployments).
    Local,
}

impl ProviderKind {
    /// Return the kind as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A configured object-store destination for backups.
///
/// Access and secret keys are stored sealed; they are decrypted only in
/// volatile memory, either on the master (reconciliation, deletion) or on
/// a node for the duration of one upload.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StorageProvider {
    /// Unique provider identifier.
    pub id: ProviderId,
    /// Human-readable name.
    pub name: String,
    /// Backing store kind.
    pub kind: ProviderKind,
    /// Endpoint URL for S3-compatible stores; root path for local ones.
    pub endpoint: String,
    /// Region hint.
    pub region: String,
    /// Bucket name.
    pub bucket: String,
    /// Sealed access key.
    #[serde(skip_serializing, default)]
    pub access_key_sealed: String,
    /// Sealed secret key.
    #[serde(skip_serializing, default)]
    pub secret_key_sealed: String,
    /// Capacity cap for this provider; 0 = unlimited.
    pub storage_limit_bytes: i64,
    /// Accounted bytes across the fleet.
    pub storage_used_bytes: i64,
    /// Whether new backups go here by default. At most one provider.
    pub is_default: bool,
    /// Whether the provider may be used at all.
    pub is_active: bool,
    /// When the provider was registered.
    pub created_at: DateTime<Utc>,
}

/// Unsealed credentials handed to a node for one upload.
///
/// Plaintext lives only in process heaps; it is never persisted by nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredentials {
    /// Provider the credentials belong to.
    pub provider_id: ProviderId,
    /// Backing store kind.
    pub kind: ProviderKind,
    /// Endpoint URL.
    pub endpoint: String,
    /// Region.
    pub region: String,
    /// Bucket name.
    pub bucket: String,
    /// Plaintext access key.
    pub access_key: String,
    /// Plaintext secret key.
    pub secret_key: String,
}
