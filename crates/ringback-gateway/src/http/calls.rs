//! Client-facing call endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use ringback_scheduler::{
    service::ScheduledSummary, ActiveCall, SubmitRequest, SubmitResponse,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    app::AppState,
    http::error::{ApiError, ApiResult},
};

/// POST /calls
pub async fn submit_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<Json<SubmitResponse>> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(Json(state.service.submit(req)?))
}

/// DELETE /calls/{id}. Succeeds whether or not anything was removed.
pub async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service.cancel(&id)?;
    Ok(Json(json!({"ok": true})))
}

/// GET /calls
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ScheduledSummary>>> {
    Ok(Json(state.service.list_scheduled()?))
}

/// GET /active-calls/{ref}
pub async fn active_call_handler(
    State(state): State<Arc<AppState>>,
    Path(call_reference_id): Path<String>,
) -> ApiResult<Json<ActiveCall>> {
    Ok(Json(state.service.active_call(&call_reference_id)?))
}
