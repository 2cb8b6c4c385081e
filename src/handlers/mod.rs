pub mod health;
pub mod metrics_api;
pub mod metrics_handler;

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::collector::Engine;

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// None when another recorder was installed first (tests)
    pub prometheus: Option<Arc<PrometheusHandle>>,
}
