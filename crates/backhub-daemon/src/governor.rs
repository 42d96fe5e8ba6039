//! Resource governor: bounded concurrency and upload bandwidth.
//!
//! Three bounded pools and one rate limiter, shared by every job on the
//! node:
//!
//! | Slot              | Used by                                    |
//! |-------------------|--------------------------------------------|
//! | I/O permits       | dump, file copy, bundling                  |
//! | Network permits   | upload, credential fetch, stats beacon     |
//! | CPU workers       | compressor threads                         |
//! | Upload bandwidth  | bytes handed to the upload transport       |
//!
//! Tokio semaphores queue waiters FIFO, so permit acquisition is fair.
//! Acquisition races the job's cancellation token: cancelling a job
//! wakes its waiters instead of leaving them parked.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use backhub_core::config::GovernorConfig;
use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_storage::Throttle;

/// Shared resource governor.
#[derive(Debug)]
pub struct Governor {
    io: Semaphore,
    network: Semaphore,
    cpu_workers: usize,
    bandwidth: Option<TokenBucket>,
}

impl Governor {
    /// Build the governor from configuration.
    pub fn new(config: &GovernorConfig) -> Self {
        Self {
            io: Semaphore::new(config.io_permits.max(1)),
            network: Semaphore::new(config.network_permits.max(1)),
            cpu_workers: config.effective_cpu_workers(),
            bandwidth: (config.upload_bandwidth_bytes_per_sec > 0)
                .then(|| TokenBucket::new(config.upload_bandwidth_bytes_per_sec)),
        }
    }

    /// Acquire an I/O permit, or fail with `Cancelled` if the job's token
    /// fires first.
    pub async fn acquire_io(&self, cancel: &CancellationToken) -> AppResult<SemaphorePermit<'_>> {
        tokio::select! {
            permit = self.io.acquire() => {
                permit.map_err(|_| AppError::internal("I/O pool closed"))
            }
            _ = cancel.cancelled() => Err(AppError::cancelled("Cancelled while waiting for I/O slot")),
        }
    }

    /// Acquire the network permit, or fail with `Cancelled`.
    pub async fn acquire_network(
        &self,
        cancel: &CancellationToken,
    ) -> AppResult<SemaphorePermit<'_>> {
        tokio::select! {
            permit = self.network.acquire() => {
                permit.map_err(|_| AppError::internal("Network pool closed"))
            }
            _ = cancel.cancelled() => Err(AppError::cancelled("Cancelled while waiting for network slot")),
        }
    }

    /// Compressor thread bound for the bundling stage.
    pub fn cpu_workers(&self) -> usize {
        self.cpu_workers
    }

    /// The upload throttle, shared process-wide.
    pub fn upload_throttle(self: &Arc<Self>) -> Arc<dyn Throttle> {
        match &self.bandwidth {
            Some(_) => Arc::new(GovernorThrottle(Arc::clone(self))),
            None => Arc::new(backhub_storage::NoThrottle),
        }
    }
}

/// Adapter exposing the bucket through the storage crate's trait.
struct GovernorThrottle(Arc<Governor>);

#[async_trait]
impl Throttle for GovernorThrottle {
    async fn acquire(&self, bytes: usize) {
        if let Some(bucket) = &self.0.bandwidth {
            bucket.acquire(bytes as u64).await;
        }
    }
}

/// Token bucket metering upload bytes.
///
/// Refills continuously at the configured rate; capacity equals one
/// second of budget, so brief bursts up to one window are allowed.
#[derive(Debug)]
struct TokenBucket {
    rate_per_sec: u64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_sec: u64) -> Self {
        Self {
            rate_per_sec,
            state: Mutex::new(BucketState {
                tokens: rate_per_sec as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    async fn acquire(&self, bytes: u64) {
        // Requests above one window's budget are paid in window-sized
        // instalments so one huge part cannot stall forever.
        let mut remaining = bytes;
        while remaining > 0 {
            let chunk = remaining.min(self.rate_per_sec);
            self.acquire_chunk(chunk).await;
            remaining -= chunk;
        }
    }

    async fn acquire_chunk(&self, bytes: u64) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate_per_sec as f64)
                    .min(self.rate_per_sec as f64);
                state.last_refill = Instant::now();

                if state.tokens >= bytes as f64 {
                    state.tokens -= bytes as f64;
                    return;
                }
                // Time until enough tokens accumulate.
                (bytes as f64 - state.tokens) / self.rate_per_sec as f64
            };
            tokio::time::sleep(std::time::Duration::from_secs_f64(wait.min(1.0))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(io: usize, net: usize, bw: u64) -> GovernorConfig {
        GovernorConfig {
            io_permits: io,
            network_permits: net,
            cpu_workers: 2,
            upload_bandwidth_bytes_per_sec: bw,
        }
    }

    #[tokio::test]
    async fn io_permits_are_bounded() {
        let governor = Governor::new(&config(2, 1, 0));
        let cancel = CancellationToken::new();

        let a = governor.acquire_io(&cancel).await.unwrap();
        let _b = governor.acquire_io(&cancel).await.unwrap();

        // Third acquisition parks until a permit frees.
        let third = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            governor.acquire_io(&cancel),
        )
        .await;
        assert!(third.is_err(), "third permit should not be available");

        drop(a);
        governor.acquire_io(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_wakes_waiters() {
        let governor = Arc::new(Governor::new(&config(1, 1, 0)));
        let cancel = CancellationToken::new();

        let _held = governor.acquire_network(&cancel).await.unwrap();

        let waiter = {
            let governor = Arc::clone(&governor);
            let cancel = cancel.clone();
            tokio::spawn(async move { governor.acquire_network(&cancel).await.map(|_| ()) })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert_eq!(
            result.unwrap_err().kind,
            backhub_core::error::ErrorKind::Cancelled
        );
    }

    #[tokio::test]
    async fn bucket_allows_one_window_burst() {
        let bucket = TokenBucket::new(1000);
        let start = Instant::now();
        // Full window available immediately.
        bucket.acquire(1000).await;
        assert!(start.elapsed().as_millis() < 100);
    }

    #[tokio::test]
    async fn bucket_paces_beyond_burst() {
        let bucket = TokenBucket::new(1000);
        let start = Instant::now();
        bucket.acquire(1000).await;
        // A further half-window must wait roughly half a second.
        bucket.acquire(500).await;
        let elapsed = start.elapsed().as_millis();
        assert!(elapsed >= 400, "elapsed {elapsed}ms, expected pacing");
    }

    #[test]
    fn cpu_workers_resolved() {
        let governor = Governor::new(&config(1, 1, 0));
        assert_eq!(governor.cpu_workers(), 2);
    }
}
