use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::models::UserContext;
use crate::serving::{AdService, ServeError};

pub struct AppState {
    pub service: Arc<AdService>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map a service failure to its status. Internal details are logged, not returned.
pub fn serve_error(err: ServeError) -> ApiError {
    match err {
        ServeError::Validation(message) => error_response(StatusCode::BAD_REQUEST, message),
        ServeError::UnknownToken => error_response(StatusCode::NOT_FOUND, "Unknown click token"),
        ServeError::Internal(e) => {
            tracing::error!("Internal error: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Select and charge an ad for the viewer in the request body
pub async fn request_ad(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UserContext>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(viewer) = payload.map_err(|rejection| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("Invalid JSON: {}", rejection.body_text()),
        )
    })?;

    match state.service.request_ad(&viewer).await.map_err(serve_error)? {
        Some(ad) => Ok(Json(ad).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
