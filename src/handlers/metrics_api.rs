//! `/api/v1/metrics` routes
//!
//! The application route collects on demand and manages sync flags; the pod
//! route only reads what the stores already hold.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::collector::ALL_APPLICATIONS;
use crate::error::AppError;

#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    /// `tables`, `sync_on`, `sync_off`, `sync_status`, `mname`, `details`
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Metric name for `details`
    pub mname: Option<String>,
}

/// GET /api/v1/metrics/:application
pub async fn application_metrics(
    State(state): State<AppState>,
    Path(application): Path<String>,
    Query(params): Query<MetricsQuery>,
) -> Result<Response, AppError> {
    let engine = &state.engine;

    match params.kind.as_deref() {
        None | Some("") => {
            let report = engine.run_cycle(&application).await.into_result()?;
            Ok(Json(report).into_response())
        }
        Some("tables") => {
            let tables = engine.query().list_tables(&application).await?;
            Ok(Json(json!({ "tables": tables })).into_response())
        }
        Some(kind @ ("sync_on" | "sync_off")) => {
            let enabled = kind == "sync_on";
            engine.set_sync(&application, enabled).await?;
            Ok(Json(json!({ "application": application, "sync": enabled })).into_response())
        }
        Some("sync_status") => {
            if application == ALL_APPLICATIONS {
                let flags = engine.sync().snapshot();
                return Ok(Json(json!({ "application": application, "sync": flags })).into_response());
            }
            let enabled = engine.sync_status(&application)?;
            Ok(Json(json!({ "application": application, "sync": enabled })).into_response())
        }
        Some("mname" | "details") => Err(AppError::BadRequest(
            "this query needs a pod: use /api/v1/metrics/{application}/{pod}".to_string(),
        )),
        Some(other) => Err(AppError::BadRequest(format!("unsupported type: {}", other))),
    }
}

/// GET /api/v1/metrics/:application/:pod
pub async fn pod_metrics(
    State(state): State<AppState>,
    Path((application, pod)): Path<(String, String)>,
    Query(params): Query<MetricsQuery>,
) -> Result<Response, AppError> {
    let query = state.engine.query();

    match params.kind.as_deref() {
        Some("mname") => {
            let names = query.list_metric_names(&application, &pod).await?;
            Ok(Json(json!({ "metricNames": names })).into_response())
        }
        Some("tables") => {
            let tables = query.list_tables(&application).await?;
            Ok(Json(json!({ "tables": tables })).into_response())
        }
        Some("details") => {
            let metric = params
                .mname
                .filter(|m| !m.is_empty())
                .ok_or_else(|| AppError::BadRequest("metric name required for details".to_string()))?;
            let details = query.get_detail(&application, &pod, &metric).await?;
            Ok(Json(json!({ "details": details })).into_response())
        }
        Some(other) => Err(AppError::BadRequest(format!("unsupported type: {}", other))),
        None => Err(AppError::BadRequest(
            "type is required: mname, tables or details".to_string(),
        )),
    }
}
