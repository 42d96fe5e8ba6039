//! Temp directory hygiene.
//!
//! Job temp dirs are named `backup_{site_id}_{job_id}` under the work
//! root. The startup sweep clears everything; the per-site sweep backs
//! the master's reset endpoint.

use std::path::Path;

use tokio::fs;
use tracing::{info, warn};

use backhub_core::result::AppResult;
use backhub_core::types::id::SiteId;

/// Remove every job temp dir under the work root. Run at daemon start,
/// before any job can own a directory.
pub async fn sweep_all(work_root: &Path) -> AppResult<usize> {
    fs::create_dir_all(work_root).await?;

    let mut removed = 0usize;
    let mut entries = fs::read_dir(work_root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("backup_") {
            continue;
        }
        match fs::remove_dir_all(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(dir = %name, error = %e, "Could not remove stale temp dir"),
        }
    }

    if removed > 0 {
        info!(removed, "Swept stale temp directories");
    }
    Ok(removed)
}

/// Remove the temp dirs of one site.
pub async fn sweep_site_dirs(work_root: &Path, site_id: SiteId) -> AppResult<usize> {
    let prefix = format!("backup_{site_id}_");
    let mut removed = 0usize;

    if !work_root.is_dir() {
        return Ok(0);
    }
    let mut entries = fs::read_dir(work_root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(&prefix) {
            continue;
        }
        match fs::remove_dir_all(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(dir = %name, error = %e, "Could not remove temp dir"),
        }
    }
    Ok(removed)
}

/// Bytes currently held under the work root, for the stats beacon.
pub async fn temp_usage_bytes(work_root: &Path) -> u64 {
    fn walk<'a>(
        dir: std::path::PathBuf,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = u64> + Send + 'a>> {
        Box::pin(async move {
            let mut total = 0u64;
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                return 0;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Ok(meta) = entry.metadata().await {
                    if meta.is_dir() {
                        total += walk(entry.path()).await;
                    } else {
                        total += meta.len();
                    }
                }
            }
            total
        })
    }
    walk(work_root.to_path_buf()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn startup_sweep_removes_only_job_dirs() {
        let root = tempfile::tempdir().unwrap();
        let site = SiteId::new();

        fs::create_dir_all(root.path().join(format!("backup_{site}_abc")))
            .await
            .unwrap();
        fs::create_dir_all(root.path().join("unrelated")).await.unwrap();

        let removed = sweep_all(root.path()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(root.path().join("unrelated").exists());
    }

    #[tokio::test]
    async fn site_sweep_is_scoped() {
        let root = tempfile::tempdir().unwrap();
        let site_a = SiteId::new();
        let site_b = SiteId::new();

        fs::create_dir_all(root.path().join(format!("backup_{site_a}_1")))
            .await
            .unwrap();
        fs::create_dir_all(root.path().join(format!("backup_{site_b}_1")))
            .await
            .unwrap();

        let removed = sweep_site_dirs(root.path(), site_a).await.unwrap();
        assert_eq!(removed, 1);
        assert!(root.path().join(format!("backup_{site_b}_1")).exists());
    }
}
