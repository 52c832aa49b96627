use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{app::AppState, http::error::ApiResult};

/// GET /health: liveness probe. Also runs an immediate due-call scan.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let report = state.service.health()?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "scheduled_count": report.scheduled_count,
        "active_count": report.active_count,
        "uptime_secs": report.uptime_secs,
    })))
}
