use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::AppState;

/// Handle /health: liveness plus the engine's view of its pollers
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let active = state.engine.active_loops().await;
    let sync = state.engine.sync().snapshot();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activePollers": active,
        "sync": sync,
    }))
}
