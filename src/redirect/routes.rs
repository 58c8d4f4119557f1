use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use super::handlers::{click_redirect, click_without_token, RedirectState};
use super::middleware::record_request_start;
use crate::serving::AdService;

pub fn create_redirect_router(service: Arc<AdService>) -> Router {
    let state = Arc::new(RedirectState { service });

    Router::new()
        .route("/api/v1/ad/click/", get(click_without_token))
        .route("/api/v1/ad/click/{token}", get(click_redirect))
        .layer(middleware::from_fn(record_request_start))
        .with_state(state)
}
