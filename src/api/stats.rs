use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::DateTime;
use serde::Deserialize;
use std::sync::Arc;

use super::handlers::{error_response, serve_error, ApiError, AppState};
use crate::models::Stats;
use crate::serving::stats::resolve_window;

/// Raw query parameters; parsed by hand so a bad value yields a descriptive 400.
#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub campaign_id: Option<String>,
}

fn parse_timestamp(name: &str, value: Option<&str>) -> Result<Option<i64>, ApiError> {
    match value.filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.timestamp()))
            .map_err(|_| {
                error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid '{name}' timestamp, expected RFC 3339"),
                )
            }),
    }
}

/// Impressions, clicks and cost over a window (default: the last 24 hours)
pub async fn stats_overview(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Stats>, ApiError> {
    let from = parse_timestamp("from", params.from.as_deref())?;
    let to = parse_timestamp("to", params.to.as_deref())?;

    let campaign_id = match params.campaign_id.as_deref().filter(|v| !v.is_empty()) {
        None => None,
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
            error_response(StatusCode::BAD_REQUEST, "Invalid campaign_id")
        })?),
    };

    let now = chrono::Utc::now().timestamp();
    let query = resolve_window(from, to, campaign_id, now);

    let stats = state.service.get_stats(&query).await.map_err(serve_error)?;
    Ok(Json(stats))
}
