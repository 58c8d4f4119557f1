use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;

use super::middleware::RequestStart;
use crate::api::handlers::{serve_error, ErrorResponse};
use crate::serving::AdService;

pub struct RedirectState {
    pub service: Arc<AdService>,
}

/// Charge the click (once per token) and send the viewer to the landing page
pub async fn click_redirect(
    State(state): State<Arc<RedirectState>>,
    Path(token): Path<String>,
    Extension(RequestStart(request_start)): Extension<RequestStart>,
) -> Response {
    redirect_for(&state, &token, request_start).await
}

/// `/api/v1/ad/click/` with nothing after the slash
pub async fn click_without_token(
    State(state): State<Arc<RedirectState>>,
    Extension(RequestStart(request_start)): Extension<RequestStart>,
) -> Response {
    redirect_for(&state, "", request_start).await
}

async fn redirect_for(
    state: &RedirectState,
    token: &str,
    request_start: std::time::Instant,
) -> Response {
    let landing_url = match state.service.register_click(token).await {
        Ok(url) => url,
        Err(e) => return serve_error(e).into_response(),
    };

    let location = match HeaderValue::from_str(&landing_url) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!(landing_url = %landing_url, "Landing URL is not a valid header value");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Internal server error".to_string(),
                }),
            )
                .into_response();
        }
    };

    let elapsed_ms = request_start.elapsed().as_millis().to_string();
    let mut response = (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
    if let Ok(value) = HeaderValue::from_str(&elapsed_ms) {
        response
            .headers_mut()
            .insert("x-adreel-timing-total-ms", value);
    }
    response
}
