//! Object-store adapters for BackHub.
//!
//! The [`ObjectStore`] trait is the only place in the system that sees
//! unsealed storage credentials: they are passed in per call via
//! [`open_store`] and dropped when the returned client goes away.

pub mod providers;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use backhub_core::result::AppResult;
use backhub_entity::provider::{ProviderCredentials, ProviderKind};

use crate::providers::local::LocalObjectStore;
use crate::providers::s3::S3ObjectStore;

/// Metadata for one stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Full object key.
    pub key: String,
    /// Object size in bytes.
    pub size_bytes: i64,
}

/// Paces bytes handed to the upload transport.
///
/// The daemon's resource governor implements this with a token bucket;
/// the master and tests use [`NoThrottle`].
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Block until `bytes` may be sent.
    async fn acquire(&self, bytes: usize);
}

/// A throttle that never waits.
#[derive(Debug, Clone, Default)]
pub struct NoThrottle;

#[async_trait]
impl Throttle for NoThrottle {
    async fn acquire(&self, _bytes: usize) {}
}

/// Options controlling a multipart upload.
pub struct UploadOpts {
    /// Part size in bytes.
    pub part_size: usize,
    /// Called with (bytes_sent, bytes_total) after every part.
    pub progress: Option<Arc<dyn Fn(u64, u64) + Send + Sync>>,
    /// Cooperative cancellation; checked before each part. A cancelled
    /// upload aborts its multipart session so no partial object remains.
    pub cancel: CancellationToken,
    /// Bandwidth pacing.
    pub throttle: Arc<dyn Throttle>,
}

impl Default for UploadOpts {
    fn default() -> Self {
        Self {
            part_size: 8 * 1024 * 1024,
            progress: None,
            cancel: CancellationToken::new(),
            throttle: Arc::new(NoThrottle),
        }
    }
}

impl std::fmt::Debug for UploadOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOpts")
            .field("part_size", &self.part_size)
            .finish()
    }
}

/// Uniform interface over S3-compatible and local object stores.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Provider kind implemented by this store.
    fn kind(&self) -> ProviderKind;

    /// Upload a file to `key` using multipart parts.
    async fn put_multipart(&self, key: &str, path: &Path, opts: UploadOpts) -> AppResult<()>;

    /// Presign a GET for restore downloads.
    async fn presign_get(&self, key: &str, expires: Duration) -> AppResult<String>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// List all objects under a prefix.
    async fn list_prefix(&self, prefix: &str) -> AppResult<Vec<ObjectMeta>>;

    /// Whether an object exists at `key`.
    async fn exists(&self, key: &str) -> AppResult<bool>;
}

/// Open a store for a set of unsealed credentials.
///
/// The credentials live only as long as the returned client; callers drop
/// it as soon as the operation completes.
pub async fn open_store(creds: &ProviderCredentials) -> AppResult<Arc<dyn ObjectStore>> {
    match creds.kind {
        ProviderKind::S3 => Ok(Arc::new(S3ObjectStore::new(creds).await?)),
        ProviderKind::Local => Ok(Arc::new(LocalObjectStore::new(creds).await?)),
    }
}

/// Sum of object sizes under a prefix.
pub async fn prefix_size(store: &dyn ObjectStore, prefix: &str) -> AppResult<i64> {
    Ok(store
        .list_prefix(prefix)
        .await?
        .iter()
        .map(|o| o.size_bytes)
        .sum())
}
