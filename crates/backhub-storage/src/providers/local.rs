//! Local filesystem object store.
//!
//! Mirrors the S3 adapter's contract onto a directory tree rooted at
//! `{endpoint}/{bucket}`. Used for single-box deployments and tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_entity::provider::{ProviderCredentials, ProviderKind};

use crate::{ObjectMeta, ObjectStore, UploadOpts};

/// Filesystem-backed object store.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `{endpoint}/{bucket}`.
    pub async fn new(creds: &ProviderCredentials) -> AppResult<Self> {
        let root = Path::new(&creds.endpoint).join(&creds.bucket);
        fs::create_dir_all(&root).await.map_err(|e| {
            AppError::with_source(
                backhub_core::error::ErrorKind::Storage,
                format!("Failed to create storage root: {}", root.display()),
                e,
            )
        })?;
        Ok(Self { root })
    }

    /// Resolve an object key to an absolute path within the root.
    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }

    /// Recursively collect files under a directory.
    fn walk<'a>(
        dir: PathBuf,
        root: &'a Path,
        out: &'a mut Vec<ObjectMeta>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = AppResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => return Ok(()),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| AppError::storage(format!("Failed to read directory: {e}")))?
            {
                let path = entry.path();
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| AppError::storage(format!("Failed to stat entry: {e}")))?;
                if meta.is_dir() {
                    Self::walk(path, root, out).await?;
                } else {
                    let key = path
                        .strip_prefix(root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .replace('\\', "/");
                    out.push(ObjectMeta {
                        key,
                        size_bytes: meta.len() as i64,
                    });
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn put_multipart(&self, key: &str, path: &Path, opts: UploadOpts) -> AppResult<()> {
        if opts.cancel.is_cancelled() {
            return Err(AppError::cancelled("Upload cancelled"));
        }

        let dest = self.resolve(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let total = fs::metadata(path).await?.len();
        opts.throttle.acquire(total as usize).await;
        fs::copy(path, &dest).await?;

        if let Some(progress) = &opts.progress {
            progress(total, total);
        }
        debug!(key, bytes = total, "Stored object locally");
        Ok(())
    }

    async fn presign_get(&self, key: &str, _expires: Duration) -> AppResult<String> {
        let path = self.resolve(key);
        if !path.exists() {
            return Err(AppError::not_found(format!("Object not found: {key}")));
        }
        Ok(format!("file://{}", path.display()))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.resolve(key);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> AppResult<Vec<ObjectMeta>> {
        let mut out = Vec::new();
        let start = self.resolve(prefix);
        if start.is_dir() {
            Self::walk(start, &self.root, &mut out).await?;
        } else if start.is_file() {
            let size = fs::metadata(&start).await?.len() as i64;
            out.push(ObjectMeta {
                key: prefix.to_string(),
                size_bytes: size,
            });
        }
        Ok(out)
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        Ok(self.resolve(key).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backhub_core::types::id::ProviderId;

    fn creds(root: &Path) -> ProviderCredentials {
        ProviderCredentials {
            provider_id: ProviderId::new(),
            kind: ProviderKind::Local,
            endpoint: root.display().to_string(),
            region: String::new(),
            bucket: "backups".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
        }
    }

    #[tokio::test]
    async fn store_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(&creds(dir.path())).await.unwrap();

        let archive = dir.path().join("a.tar.zst");
        tokio::fs::write(&archive, b"archive-bytes").await.unwrap();

        store
            .put_multipart("node/site/a.tar.zst", &archive, UploadOpts::default())
            .await
            .unwrap();
        assert!(store.exists("node/site/a.tar.zst").await.unwrap());

        let listed = store.list_prefix("node/site/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size_bytes, 13);

        store.delete("node/site/a.tar.zst").await.unwrap();
        assert!(!store.exists("node/site/a.tar.zst").await.unwrap());
        // Deleting again is fine.
        store.delete("node/site/a.tar.zst").await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_upload_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(&creds(dir.path())).await.unwrap();
        let archive = dir.path().join("a.bin");
        tokio::fs::write(&archive, b"x").await.unwrap();

        let opts = UploadOpts::default();
        opts.cancel.cancel();
        let err = store
            .put_multipart("k", &archive, opts)
            .await
            .unwrap_err();
        assert_eq!(err.kind, backhub_core::error::ErrorKind::Cancelled);
    }
}
