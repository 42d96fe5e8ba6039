//! S3-compatible object store.
//!
//! Works against AWS S3 and any compatible gateway (MinIO, Storj, Ceph).
//! Path-style addressing is forced so bucket names never have to resolve
//! through DNS.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_entity::provider::{ProviderCredentials, ProviderKind};

use crate::{ObjectMeta, ObjectStore, UploadOpts};

/// Minimum part size S3 accepts for all but the last part.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3-compatible object store client.
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from unsealed credentials.
    pub async fn new(creds: &ProviderCredentials) -> AppResult<Self> {
        let credentials = Credentials::new(
            &creds.access_key,
            &creds.secret_key,
            None,
            None,
            "backhub",
        );

        let mut builder = S3ConfigBuilder::new()
            .region(Region::new(creds.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true);

        if !creds.endpoint.is_empty() {
            let endpoint = if creds.endpoint.starts_with("http") {
                creds.endpoint.clone()
            } else {
                format!("https://{}", creds.endpoint)
            };
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: S3Client::from_conf(builder.build()),
            bucket: creds.bucket.clone(),
        })
    }

    /// Abort a multipart session, logging rather than failing: the upload
    /// already failed and S3 lifecycle rules mop up stragglers.
    async fn abort(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(key, error = %e, "Failed to abort multipart upload");
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn kind(&self) -> ProviderKind {
        ProviderKind::S3
    }

    async fn put_multipart(&self, key: &str, path: &Path, opts: UploadOpts) -> AppResult<()> {
        let meta = tokio::fs::metadata(path).await?;
        let total = meta.len();
        let part_size = opts.part_size.max(MIN_PART_SIZE);

        // Small archives go up in one request.
        if total as usize <= part_size {
            opts.throttle.acquire(total as usize).await;
            if opts.cancel.is_cancelled() {
                return Err(AppError::cancelled("Upload cancelled"));
            }
            let body = ByteStream::from_path(path)
                .await
                .map_err(|e| AppError::storage(format!("Failed to read archive: {e}")))?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body)
                .content_length(total as i64)
                .send()
                .await
                .map_err(|e| AppError::transient(format!("Upload failed: {e}")))?;
            if let Some(progress) = &opts.progress {
                progress(total, total);
            }
            return Ok(());
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::transient(format!("Failed to start multipart upload: {e}")))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| AppError::storage("S3 returned no upload id"))?
            .to_string();

        let mut file = tokio::fs::File::open(path).await?;
        let mut completed: Vec<CompletedPart> = Vec::new();
        let mut sent: u64 = 0;
        let mut part_number = 1i32;

        loop {
            // Cancellation checkpoint before every part.
            if opts.cancel.is_cancelled() {
                self.abort(key, &upload_id).await;
                return Err(AppError::cancelled("Upload cancelled"));
            }

            let mut buf = vec![0u8; part_size];
            let mut filled = 0usize;
            while filled < part_size {
                let n = file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            buf.truncate(filled);

            opts.throttle.acquire(filled).await;

            let part = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buf))
                .send()
                .await
                .map_err(|e| {
                    AppError::transient(format!("Part {part_number} upload failed: {e}"))
                });
            let part = match part {
                Ok(p) => p,
                Err(e) => {
                    self.abort(key, &upload_id).await;
                    return Err(e);
                }
            };

            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(part.e_tag().map(String::from))
                    .build(),
            );

            sent += filled as u64;
            part_number += 1;
            if let Some(progress) = &opts.progress {
                progress(sent, total);
            }
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| AppError::transient(format!("Failed to complete upload: {e}")))?;

        debug!(key, bytes = total, parts = part_number - 1, "Multipart upload complete");
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires: Duration) -> AppResult<String> {
        let config = PresigningConfig::expires_in(expires)
            .map_err(|e| AppError::internal(format!("Invalid presign expiry: {e}")))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| AppError::transient(format!("Failed to presign GET: {e}")))?;
        Ok(presigned.uri().to_string())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::transient(format!("Failed to delete object: {e}")))?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> AppResult<Vec<ObjectMeta>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| AppError::transient(format!("Failed to list prefix: {e}")))?;

            for obj in page.contents() {
                if let Some(key) = obj.key() {
                    objects.push(ObjectMeta {
                        key: key.to_string(),
                        size_bytes: obj.size().unwrap_or(0),
                    });
                }
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(objects)
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(AppError::transient(format!(
                        "Failed to head object: {service_err}"
                    )))
                }
            }
        }
    }
}
