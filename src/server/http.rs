//! Request/response handlers: `/poll_data`, `/new_subject`, `/health`,
//! `/metrics`.

use super::AppState;
use crate::broadcast::ErrorShape;
use crate::polls::{Action, Document};
use crate::service::ServiceError;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// Error response: status plus `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    shape: ErrorShape,
}

impl ApiError {
    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            shape: ErrorShape::new(code, message),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        warn!(error = %e, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            shape: e.to_shape(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.shape)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct NewSubjectQuery {
    pub subject: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

/// `GET /poll_data`: the current document.
pub async fn poll_data(State(state): State<AppState>) -> Result<Json<Document>, ApiError> {
    Ok(Json(state.service.snapshot().await?))
}

/// `POST /new_subject?subject=<name>`: create a subject, broadcasting only if
/// it did not exist.
pub async fn new_subject(
    State(state): State<AppState>,
    query: Result<Query<NewSubjectQuery>, QueryRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Query(query) =
        query.map_err(|e| ApiError::bad_request("missing_field", e.body_text()))?;

    let outcome = state
        .service
        .submit(&Action::new_subject(&query.subject))
        .await?;
    let message = if outcome.changed() {
        format!("New subject '{}' added successfully", query.subject)
    } else {
        format!("Subject '{}' already exists", query.subject)
    };
    Ok(Json(MessageResponse { message }))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "connections": state.service.broadcaster().connection_count(),
        "channels": state.service.broadcaster().connections(),
    }))
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.service.metrics().render(),
    )
}
