//! `backhub-daemon` — per-node backup daemon.
//!
//! Discovers WordPress sites, executes the staged backup pipeline under
//! the resource governor, and reports everything to the master. On first
//! start it walks the enrollment flow and prints its registration code.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use backhub_core::config::DaemonConfig;
use backhub_core::error::AppError;

use backhub_daemon::client::MasterClient;
use backhub_daemon::governor::Governor;
use backhub_daemon::pipeline::engine::Engine;
use backhub_daemon::schedule_ticker;
use backhub_daemon::server::{ControlState, run_control_server};
use backhub_daemon::sweep;
use backhub_daemon::{enroll, scanner};

#[tokio::main]
async fn main() {
    let config_path =
        std::env::var("BACKHUBD_CONFIG").unwrap_or_else(|_| "/etc/backhub/daemon".to_string());
    let config = match DaemonConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        error!("Daemon error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing.
fn init_logging(config: &DaemonConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Main daemon run function.
async fn run(config: DaemonConfig) -> Result<(), AppError> {
    let hostname = hostname();
    info!(hostname = %hostname, master = %config.master_url, "Starting backhub-daemon");

    // Stale temp dirs from a crashed run go first.
    let work_root = PathBuf::from(&config.work_root);
    sweep::sweep_all(&work_root).await?;

    // Enroll if this is a fresh node; otherwise pick up the stored key.
    let bootstrap = MasterClient::new(&config.master_url, None);
    let api_key = match enroll::load_api_key(&config.api_key_file).await {
        Some(key) => key,
        None => {
            enroll::enroll(&bootstrap, &hostname, &config.control_bind, &config.api_key_file)
                .await?
        }
    };
    let client = bootstrap.with_api_key(api_key.clone());

    // Initial site scan, reported to the master.
    match scanner::scan_web_root(&config.web_root).await {
        Ok(sites) if !sites.is_empty() => {
            if let Err(e) = client.report_sites(&sites).await {
                warn!(error = %e, "Initial site report failed");
            }
        }
        Ok(_) => info!("No WordPress sites found at startup"),
        Err(e) => warn!(error = %e, "Initial site scan failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            wait_for_signal().await;
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // The engine and its single worker.
    let governor = Arc::new(Governor::new(&config.governor));
    let (engine, worker) = Engine::start(
        Arc::clone(&governor),
        client.clone(),
        work_root.clone(),
        config.keep_on_failure,
        shutdown_rx.clone(),
    );

    // Schedule ticker.
    let ticker = tokio::spawn(schedule_ticker::run(
        client.clone(),
        Arc::clone(&engine),
        shutdown_rx.clone(),
    ));

    // Stats beacon.
    let beacon = tokio::spawn(heartbeat_loop(
        client.clone(),
        Arc::clone(&engine),
        work_root.clone(),
        config.stats_interval_seconds,
        shutdown_rx.clone(),
    ));

    // Control listener; blocks until shutdown.
    let control_state = ControlState {
        engine: Arc::clone(&engine),
        api_key: Arc::new(api_key),
        work_root: Arc::new(work_root),
        web_root: Arc::new(config.web_root.clone()),
    };
    run_control_server(&config.control_bind, control_state, shutdown_rx).await?;

    // Give the in-flight job a bounded grace, then leave; the master's
    // stale sweep fails anything that never reported back.
    let _ = tokio::time::timeout(Duration::from_secs(30), worker).await;
    ticker.abort();
    beacon.abort();

    info!("Daemon stopped");
    Ok(())
}

/// Periodic stats beacon to the master.
async fn heartbeat_loop(
    client: MasterClient,
    engine: Arc<Engine>,
    work_root: PathBuf,
    interval_seconds: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(10)));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        }

        let temp_bytes = sweep::temp_usage_bytes(&work_root).await;
        if let Err(e) = client
            .heartbeat(engine.active_count() as u32, temp_bytes)
            .await
        {
            warn!(error = %e, "Heartbeat failed");
        }
    }
}

/// Best-effort hostname.
fn hostname() -> String {
    std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()).unwrap_or_else(|| {
        std::fs::read_to_string("/etc/hostname")
            .map(|h| h.trim().to_string())
            .unwrap_or_else(|_| "unknown-node".to_string())
    })
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
