//! WordPress backup stages.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_entity::backup::BackupReport;
use backhub_storage::{UploadOpts, open_store};

use crate::client::MasterClient;
use crate::governor::Governor;
use crate::scanner;

use super::StageOutput;
use super::context::JobContext;

/// Database dump timeout.
const DUMP_TIMEOUT: Duration = Duration::from_secs(3600);
/// Archive creation timeout.
const BUNDLE_TIMEOUT: Duration = Duration::from_secs(1800);
/// Upload timeout.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(6 * 3600);

/// Directories and files never copied out of wp-content.
const COPY_EXCLUSIONS: &[&str] = &[
    "cache",
    "w3tc-config",
    "uploads/cache",
    "node_modules",
    ".git",
    "debug.log",
];

/// The WordPress backup module: stage bodies over the shared context.
pub struct WordPressModule {
    governor: Arc<Governor>,
    client: MasterClient,
}

impl WordPressModule {
    /// Create the module.
    pub fn new(governor: Arc<Governor>, client: MasterClient) -> Self {
        Self { governor, client }
    }

    /// Dispatch one stage by name.
    pub async fn execute_stage(&self, stage: &str, ctx: &mut JobContext) -> AppResult<StageOutput> {
        match stage {
            "backup_db" => self.backup_db(ctx).await,
            "backup_files" => self.backup_files(ctx).await,
            "create_bundle" => self.create_bundle(ctx).await,
            "upload_remote" => self.upload_remote(ctx).await,
            "cleanup" => self.cleanup(ctx).await,
            other => Err(AppError::internal(format!("Unknown stage: {other}"))),
        }
    }

    // ── backup_db ────────────────────────────────────────────

    /// Dump the site's database with mysqldump into `temp/database.sql`.
    async fn backup_db(&self, ctx: &mut JobContext) -> AppResult<StageOutput> {
        let _io = self.governor.acquire_io(&ctx.cancel).await?;

        fs::create_dir_all(&ctx.temp_dir).await?;
        let sql_file = ctx.temp_dir.join("database.sql");

        // Site record first, wp-config.php as the fallback for anything
        // the record leaves blank (the password always comes from
        // wp-config; the master never ships it to nodes).
        let parsed = scanner::read_wp_config(Path::new(&ctx.site.wp_config_path))
            .await
            .unwrap_or_default();
        let db_name = ctx
            .site
            .db_name
            .clone()
            .or(parsed.db_name)
            .ok_or_else(|| AppError::config("Database name could not be resolved"))?;
        let db_user = ctx
            .site
            .db_user
            .clone()
            .or(parsed.db_user)
            .ok_or_else(|| AppError::config("Database user could not be resolved"))?;
        let db_password = parsed
            .db_password
            .ok_or_else(|| AppError::config("Database password could not be resolved"))?;
        let db_host = ctx
            .site
            .db_host
            .clone()
            .or(parsed.db_host)
            .unwrap_or_else(|| "localhost".to_string());

        info!(site = %ctx.site.name, db = %db_name, "Dumping database");

        let out_file = std::fs::File::create(&sql_file)
            .map_err(|e| AppError::storage(format!("Cannot create dump file: {e}")))?;

        let mut child = Command::new("mysqldump")
            .arg("-h")
            .arg(&db_host)
            .arg("-u")
            .arg(&db_user)
            .arg("--add-drop-table")
            .arg("--single-transaction")
            .arg("--quick")
            .arg(&db_name)
            .env("MYSQL_PWD", &db_password)
            .stdout(Stdio::from(out_file))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::config(format!("mysqldump could not be started: {e}")))?;

        let status = wait_subprocess(&mut child, DUMP_TIMEOUT, ctx).await?;
        if !status.success() {
            let stderr = read_stderr(&mut child).await;
            return Err(AppError::transient(format!("mysqldump failed: {stderr}")));
        }

        let size = fs::metadata(&sql_file).await?.len();
        ctx.scratch
            .insert("db_size".to_string(), serde_json::json!(size));

        Ok(StageOutput::ok_with(
            format!("Database dumped ({:.1} MB)", size as f64 / 1_048_576.0),
            serde_json::json!({"size_bytes": size}),
        ))
    }

    // ── backup_files ─────────────────────────────────────────

    /// Mirror wp-content (minus exclusions) and wp-config.php into the
    /// temp directory.
    async fn backup_files(&self, ctx: &mut JobContext) -> AppResult<StageOutput> {
        let _io = self.governor.acquire_io(&ctx.cancel).await?;

        let source = PathBuf::from(&ctx.site.wp_content_path);
        if !source.is_dir() {
            return Err(AppError::config(format!(
                "wp-content not found at {}",
                source.display()
            )));
        }

        // Sizing pass so the copy can report a real fraction.
        let total = dir_size(&source, &source).await?;
        ctx.counters.reset(total);

        let dest = ctx.temp_dir.join("wp-content");
        copy_tree(&source, &dest, &source, ctx).await?;

        // The bundle carries wp-config.php alongside the content tree.
        let config_dest = ctx.temp_dir.join("wp-config.php");
        fs::copy(&ctx.site.wp_config_path, &config_dest)
            .await
            .map_err(|e| AppError::config(format!("wp-config.php could not be copied: {e}")))?;

        let (copied, _) = ctx.counters.read();
        ctx.scratch
            .insert("files_size".to_string(), serde_json::json!(copied));

        Ok(StageOutput::ok_with(
            format!("Files backed up ({:.1} MB)", copied as f64 / 1_048_576.0),
            serde_json::json!({"size_bytes": copied}),
        ))
    }

    // ── create_bundle ────────────────────────────────────────

    /// Produce `{site_name}_{YYYYMMDD}_{HHMMSS}.tar.zst` with a
    /// multithreaded zstd bound by the governor's CPU workers.
    async fn create_bundle(&self, ctx: &mut JobContext) -> AppResult<StageOutput> {
        let _io = self.governor.acquire_io(&ctx.cancel).await?;

        // Timestamp in the site's local zone.
        let zone = ctx.site.schedule().zone();
        let stamp = Utc::now().with_timezone(&zone).format("%Y%m%d_%H%M%S");
        let archive_name = format!("{}_{}.tar.zst", ctx.site.name, stamp);
        let archive_path = ctx.temp_dir.join(&archive_name);

        info!(site = %ctx.site.name, archive = %archive_name, "Creating archive");

        let zstd = format!("zstd -T{}", self.governor.cpu_workers());
        let mut child = Command::new("tar")
            .arg("-I")
            .arg(&zstd)
            .arg("-cf")
            .arg(&archive_path)
            .arg("-C")
            .arg(&ctx.temp_dir)
            .arg("database.sql")
            .arg("wp-config.php")
            .arg("wp-content")
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::config(format!("tar could not be started: {e}")))?;

        let status = wait_subprocess(&mut child, BUNDLE_TIMEOUT, ctx).await?;
        if !status.success() {
            let stderr = read_stderr(&mut child).await;
            return Err(AppError::fatal(format!("Archive creation failed: {stderr}")));
        }

        let size = fs::metadata(&archive_path).await?.len();
        ctx.archive_path = Some(archive_path);
        ctx.archive_name = Some(archive_name.clone());
        ctx.scratch
            .insert("archive_size".to_string(), serde_json::json!(size));

        Ok(StageOutput::ok_with(
            format!("Archive created ({:.1} MB)", size as f64 / 1_048_576.0),
            serde_json::json!({"archive_name": archive_name, "size_bytes": size}),
        ))
    }

    // ── upload_remote ────────────────────────────────────────

    /// Pre-flight check, credential fetch, multipart put.
    ///
    /// The object key is built exclusively from opaque ids; the human
    /// site name appears only in the file name component.
    async fn upload_remote(&self, ctx: &mut JobContext) -> AppResult<StageOutput> {
        let archive_path = ctx
            .archive_path
            .clone()
            .ok_or_else(|| AppError::internal("Archive missing before upload"))?;
        let archive_name = ctx
            .archive_name
            .clone()
            .ok_or_else(|| AppError::internal("Archive name missing before upload"))?;
        let size = fs::metadata(&archive_path).await?.len() as i64;

        let _net = self.governor.acquire_network(&ctx.cancel).await?;

        // Pre-flight with the real on-disk size.
        let answer = self.client.quota_preflight(ctx.site_id, size).await?;
        if !answer.can_proceed {
            return Err(AppError::quota_exceeded(
                answer
                    .warning
                    .unwrap_or_else(|| "Quota would be exceeded".to_string()),
            ));
        }

        // Credentials live only for this upload.
        let creds = self.client.storage_config().await?;
        let provider_id = creds.provider_id;
        let store = open_store(&creds).await?;

        let object_path = format!("{}/{}/{}", ctx.site.node_id, ctx.site_id, archive_name);
        ctx.counters.reset(size as u64);

        let sent = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let sent_hook = Arc::clone(&sent);
        let opts = UploadOpts {
            part_size: 8 * 1024 * 1024,
            progress: Some(Arc::new(move |bytes, _total| {
                sent_hook.store(bytes, std::sync::atomic::Ordering::Relaxed);
            })),
            cancel: ctx.cancel.clone(),
            throttle: self.governor.upload_throttle(),
        };

        info!(site = %ctx.site.name, key = %object_path, bytes = size, "Uploading archive");

        // Drain the part-completion hook into the live counters while the
        // transfer runs, and enforce the stage timeout.
        let upload = store.put_multipart(&object_path, &archive_path, opts);
        tokio::pin!(upload);
        let deadline = tokio::time::sleep(UPLOAD_TIMEOUT);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        let live = &ctx.counters;
        let result = loop {
            tokio::select! {
                result = &mut upload => break result,
                _ = ticker.tick() => {
                    live.set(sent.load(std::sync::atomic::Ordering::Relaxed));
                }
                _ = &mut deadline => break Err(AppError::transient("Upload timed out")),
            }
        };
        result?;
        live.set(size as u64);

        ctx.object_path = Some(object_path.clone());
        ctx.scratch
            .insert("provider_id".to_string(), serde_json::json!(provider_id));

        Ok(StageOutput::ok_with(
            format!("Uploaded to {object_path}"),
            serde_json::json!({"object_path": object_path, "size_bytes": size}),
        ))
    }

    // ── cleanup ──────────────────────────────────────────────

    /// Remove the temp directory. Runs on every outcome; failures here
    /// are logged and never override the pipeline result.
    async fn cleanup(&self, ctx: &mut JobContext) -> AppResult<StageOutput> {
        if !ctx.temp_dir.exists() {
            return Ok(StageOutput::skipped("Nothing to clean up"));
        }
        match fs::remove_dir_all(&ctx.temp_dir).await {
            Ok(()) => {
                debug!(dir = %ctx.temp_dir.display(), "Removed temp directory");
                Ok(StageOutput::ok("Cleanup completed"))
            }
            Err(e) => {
                warn!(dir = %ctx.temp_dir.display(), error = %e, "Cleanup failed");
                Err(AppError::storage(format!("Cleanup failed: {e}")))
            }
        }
    }

    /// Assemble the completion report for the master.
    pub fn completion_report(&self, ctx: &JobContext) -> AppResult<BackupReport> {
        let provider_id = ctx
            .scratch
            .get("provider_id")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .ok_or_else(|| AppError::internal("Provider id missing after upload"))?;
        Ok(BackupReport {
            site_id: ctx.site_id,
            filename: ctx
                .archive_name
                .clone()
                .ok_or_else(|| AppError::internal("Archive name missing after upload"))?,
            size_bytes: ctx
                .scratch
                .get("archive_size")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            object_path: ctx
                .object_path
                .clone()
                .ok_or_else(|| AppError::internal("Object path missing after upload"))?,
            provider_id,
        })
    }
}

/// Wait for a subprocess, killing it on timeout or cancellation.
async fn wait_subprocess(
    child: &mut tokio::process::Child,
    timeout: Duration,
    ctx: &JobContext,
) -> AppResult<std::process::ExitStatus> {
    tokio::select! {
        status = child.wait() => {
            status.map_err(|e| AppError::internal(format!("Subprocess wait failed: {e}")))
        }
        _ = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            Err(AppError::transient("Subprocess timed out"))
        }
        _ = ctx.cancel.cancelled() => {
            let _ = child.kill().await;
            Err(AppError::cancelled("Backup cancelled"))
        }
    }
}

/// Drain a child's stderr for error reporting.
async fn read_stderr(child: &mut tokio::process::Child) -> String {
    use tokio::io::AsyncReadExt;
    let mut buf = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut buf).await;
    }
    if buf.is_empty() {
        "unknown error".to_string()
    } else {
        buf.trim().to_string()
    }
}

/// Whether a path relative to wp-content is excluded from the copy.
fn is_excluded(relative: &Path) -> bool {
    let rel = relative.to_string_lossy().replace('\\', "/");
    COPY_EXCLUSIONS
        .iter()
        .any(|ex| rel == *ex || rel.starts_with(&format!("{ex}/")))
}

/// Sum file sizes under a directory, honouring the exclusion set.
fn dir_size<'a>(
    dir: &'a Path,
    root: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = AppResult<u64>> + Send + 'a>> {
    Box::pin(async move {
        let mut total = 0u64;
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if is_excluded(relative) {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                total += dir_size(&path, root).await?;
            } else if meta.is_file() {
                total += meta.len();
            }
        }
        Ok(total)
    })
}

/// Buffered recursive copy with cancellation checkpoints at every entry.
fn copy_tree<'a>(
    dir: &'a Path,
    dest: &'a Path,
    root: &'a Path,
    ctx: &'a JobContext,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = AppResult<()>> + Send + 'a>> {
    Box::pin(async move {
        fs::create_dir_all(dest).await?;
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            ctx.checkpoint()?;

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if is_excluded(relative) {
                continue;
            }

            let target = dest.join(entry.file_name());
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                copy_tree(&path, &target, root, ctx).await?;
            } else if meta.is_file() {
                let copied = fs::copy(&path, &target).await?;
                ctx.counters.add(copied);
            }
            // Symlinks and specials are skipped; archives carry real
            // content only.
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_matching() {
        assert!(is_excluded(Path::new("cache")));
        assert!(is_excluded(Path::new("cache/page/index.html")));
        assert!(is_excluded(Path::new("uploads/cache")));
        assert!(is_excluded(Path::new("uploads/cache/thumb.jpg")));
        assert!(is_excluded(Path::new("debug.log")));
        assert!(is_excluded(Path::new(".git/config")));

        assert!(!is_excluded(Path::new("uploads/2024/photo.jpg")));
        assert!(!is_excluded(Path::new("themes/cache-buster/style.css")));
        assert!(!is_excluded(Path::new("plugins/debug.log.bak")));
    }
}
