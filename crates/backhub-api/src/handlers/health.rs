//! Health check handlers.

use axum::Json;
use axum::extract::State;
use serde_json::json;

use backhub_core::error::AppError;

use crate::extractors::AuthUser;
use crate::state::AppState;

/// GET /api/health — no auth.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// GET /api/health/detailed — authenticated; includes DB status and the
/// process metrics counters.
pub async fn detailed_health(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db_pool)
        .await
        .map(|v| v == 1)
        .unwrap_or(false);

    Ok(Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": db_ok,
        "metrics": state.metrics.snapshot(),
    })))
}
