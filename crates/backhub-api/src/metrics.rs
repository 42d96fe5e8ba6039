//! Process metrics counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

/// Fleet-level counters surfaced by the detailed health endpoint.
#[derive(Debug, Default)]
pub struct Metrics {
    backups_started: AtomicU64,
    backups_succeeded: AtomicU64,
    backups_failed: AtomicU64,
    bytes_uploaded: AtomicU64,
    sse_subscribers: AtomicI64,
}

/// Snapshot of the counters for serialization.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Backups started since process start.
    pub backups_started: u64,
    /// Backups reported successful.
    pub backups_succeeded: u64,
    /// Backups that ended failed or stopped.
    pub backups_failed: u64,
    /// Bytes accounted from successful uploads.
    pub bytes_uploaded: u64,
    /// Currently connected SSE subscribers.
    pub sse_subscribers: i64,
}

impl Metrics {
    /// Record a started backup.
    pub fn backup_started(&self) {
        self.backups_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful backup of `bytes`.
    pub fn backup_succeeded(&self, bytes: u64) {
        self.backups_succeeded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a failed or stopped backup.
    pub fn backup_failed(&self) {
        self.backups_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Track an SSE subscriber connecting.
    pub fn sse_connected(&self) {
        self.sse_subscribers.fetch_add(1, Ordering::Relaxed);
    }

    /// Track an SSE subscriber disconnecting.
    pub fn sse_disconnected(&self) {
        self.sse_subscribers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Snapshot all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            backups_started: self.backups_started.load(Ordering::Relaxed),
            backups_succeeded: self.backups_succeeded.load(Ordering::Relaxed),
            backups_failed: self.backups_failed.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            sse_subscribers: self.sse_subscribers.load(Ordering::Relaxed),
        }
    }
}
