//! HTTP request handlers.

use super::AppState;
use crate::db::TargetId;
use crate::engine::IngestError;
use crate::probe::IngestReport;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

// ============================================================================
// Ingest
// ============================================================================

pub async fn handle_ingest_metrics(
    State(state): State<AppState>,
    body: Result<Json<IngestReport>, JsonRejection>,
) -> Response {
    let Json(report) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    match state.engine.ingest_metrics(report).await {
        Ok(()) => Json(json!({ "status": "accepted" })).into_response(),
        Err(e @ IngestError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ IngestError::Invalid(_)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e @ IngestError::Repository(_)) => {
            tracing::error!("Web: ingest failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ============================================================================
// Checks
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChecksQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

pub async fn handle_list_checks(
    State(state): State<AppState>,
    Path(id): Path<TargetId>,
    Query(query): Query<ChecksQuery>,
) -> Response {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return error_response(StatusCode::BAD_REQUEST, "from must not be after to");
        }
    }

    match state.engine.repository().list_checks(id, query.from, query.to) {
        Ok(checks) => Json(checks).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn handle_latest_check(State(state): State<AppState>, Path(id): Path<TargetId>) -> Response {
    match state.engine.repository().latest_check(id) {
        Ok(Some(check)) => Json(check).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("no checks for target {}", id)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Control
// ============================================================================

pub async fn handle_reload(State(state): State<AppState>) -> impl IntoResponse {
    state.engine.reload().await;
    (StatusCode::ACCEPTED, Json(json!({ "status": "reloading" })))
}

pub async fn handle_healthz() -> &'static str {
    "ok"
}
