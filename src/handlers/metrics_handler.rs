use axum::{extract::State, http::StatusCode, response::IntoResponse};

use super::AppState;

/// Handle /internal/metrics: the engine's own Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}
