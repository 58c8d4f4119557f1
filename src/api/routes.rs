use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::redirect::create_redirect_router;
use crate::serving::AdService;

use super::handlers::{health_check, request_ad, AppState};
use super::stats::stats_overview;

pub fn create_api_router(service: Arc<AdService>) -> Router {
    let state = Arc::new(AppState {
        service: Arc::clone(&service),
    });

    let api_routes = Router::new()
        .route("/api/v1/ad/request", post(request_ad))
        .route("/api/v1/stats/overview", get(stats_overview))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .merge(api_routes)
        .merge(create_redirect_router(service))
}
