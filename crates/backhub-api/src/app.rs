//! Application bootstrap — wires state, router, workers, and lifecycle.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info};

use backhub_core::config::AppConfig;
use backhub_core::error::AppError;
use backhub_worker::MaintenanceScheduler;

use crate::router::build_router;
use crate::state::AppState;

/// Run the master server until SIGINT/SIGTERM.
pub async fn run_server(config: AppConfig, db_pool: PgPool) -> Result<(), AppError> {
    let state = AppState::build(config, db_pool);

    // Terminal states survive restarts; rehydrate the live store.
    let persisted = state.progress_repo.find_all().await?;
    state.progress.hydrate(persisted);

    // Periodic jobs: deletion sweep, reconciliation, stale-progress sweep.
    let mut scheduler = MaintenanceScheduler::new(
        state.config.worker.clone(),
        Arc::clone(&state.retention),
        Arc::clone(&state.reconcile),
        Arc::clone(&state.progress_repo),
        Arc::clone(&state.progress),
    )
    .await?;
    scheduler.register_default_tasks().await?;
    scheduler.start().await?;

    let bind = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {bind}: {e}")))?;
    info!(address = %bind, "Master API listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let app = build_router(state);
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
        info!("Shutdown signal received");
    });

    let result = serve.await;

    if let Err(e) = scheduler.shutdown().await {
        error!(error = %e, "Scheduler shutdown failed");
    }

    result.map_err(|e| AppError::internal(format!("Server error: {e}")))
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
