//! Route definitions for the BackHub HTTP API.
//!
//! All routes are organized by domain and mounted under `/api`.
//! The router receives `AppState` and passes it to all handlers via
//! Axum's `State` extractor.

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(auth_routes())
        .merge(node_routes())
        .merge(site_routes())
        .merge(backup_routes())
        .merge(daemon_routes())
        .merge(storage_routes())
        .merge(activity_routes())
        .merge(health_routes());

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Login and identity endpoints.
fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/mfa/verify", post(handlers::auth::mfa_verify))
        .route("/auth/me", get(handlers::auth::me))
}

/// Node enrollment and management.
fn node_routes() -> Router<AppState> {
    Router::new()
        .route("/nodes/join-request", post(handlers::nodes::join_request))
        .route(
            "/nodes/status/code/{code}",
            get(handlers::nodes::status_by_code),
        )
        .route("/nodes/approve/{id}", post(handlers::nodes::approve))
        .route(
            "/nodes/register-by-code",
            post(handlers::nodes::register_by_code),
        )
        .route("/nodes/storage-config", get(handlers::nodes::storage_config))
        .route("/nodes", get(handlers::nodes::list_nodes))
        .route("/nodes/{id}", get(handlers::nodes::get_node))
        .route("/nodes/{id}/sites", get(handlers::nodes::list_node_sites))
        .route("/nodes/{id}/quota", put(handlers::nodes::update_quota))
}

/// Site listing, quota, and backup control.
fn site_routes() -> Router<AppState> {
    Router::new()
        .route("/sites", get(handlers::sites::list_sites))
        .route("/sites/{id}", get(handlers::sites::get_site))
        .route("/sites/{id}/backups", get(handlers::sites::list_site_backups))
        .route("/sites/{id}/backup/start", post(handlers::sites::start_backup))
        .route("/sites/{id}/backup/status", get(handlers::sites::backup_status))
        .route("/sites/{id}/backup/stop", post(handlers::sites::stop_backup))
        .route("/sites/{id}/quota/check", get(handlers::sites::quota_check))
        .route("/sites/{id}/quota", put(handlers::sites::update_quota))
}

/// Backup records.
fn backup_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/backups/scheduled-deletions",
            get(handlers::backups::list_scheduled_deletions),
        )
        .route("/backups/{id}", delete(handlers::backups::delete_backup))
        .route(
            "/backups/{id}/cancel-deletion",
            delete(handlers::backups::cancel_scheduled_deletion),
        )
        .route("/backups/{id}/download", get(handlers::backups::download_backup))
}

/// Daemon-facing endpoints and the progress stream.
fn daemon_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/daemon/progress/begin/{site_id}",
            post(handlers::daemon::progress_begin),
        )
        .route(
            "/daemon/progress/{site_id}",
            post(handlers::daemon::progress_update),
        )
        .route(
            "/daemon/progress/{site_id}/finish",
            post(handlers::daemon::progress_finish),
        )
        .route(
            "/daemon/quota/check/{site_id}",
            get(handlers::daemon::quota_preflight),
        )
        .route("/daemon/backups/report", post(handlers::daemon::report_backup))
        .route("/daemon/heartbeat", post(handlers::daemon::heartbeat))
        .route("/daemon/sites", get(handlers::daemon::my_sites))
        .route("/daemon/sites/report", post(handlers::daemon::report_sites))
        .route("/daemon/sites/{site_id}", get(handlers::daemon::my_site))
        .route(
            "/daemon/sites/{site_id}/next-run",
            post(handlers::daemon::update_next_run),
        )
        .route(
            "/daemon/backup/reset/{site_id}",
            post(handlers::daemon::reset_backup),
        )
        .route(
            "/daemon/backup/stream/{site_id}",
            get(handlers::daemon::stream_backup),
        )
}

/// Storage provider administration.
fn storage_routes() -> Router<AppState> {
    Router::new()
        .route("/storage/providers", get(handlers::storage::list_providers))
        .route("/storage/providers", post(handlers::storage::create_provider))
        .route("/storage/reconcile", post(handlers::storage::reconcile))
}

/// Activity log.
fn activity_routes() -> Router<AppState> {
    Router::new().route("/activity", get(handlers::activity::search_activity))
}

/// Health check endpoints.
fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/detailed", get(handlers::health::detailed_health))
}
