use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics exporter
/// Returns None if the recorder is already installed (e.g., in tests)
pub fn init_metrics() -> Option<PrometheusHandle> {
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            return None;
        }
    };

    init_metric_descriptions();

    Some(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(
        "fleet_metrics_scrapes_total",
        "Pod scrapes attempted, by application and result"
    );
    describe_counter!(
        "fleet_metrics_persist_total",
        "Snapshots handled by the ingestion writer, by outcome"
    );
    describe_histogram!(
        "fleet_metrics_persist_duration_seconds",
        "Time spent in one persist transaction"
    );
    describe_counter!(
        "fleet_metrics_cycles_total",
        "Poll cycles run, by application"
    );
    describe_gauge!(
        "fleet_metrics_active_pollers",
        "Number of running poll loops"
    );
    describe_gauge!(
        "fleet_metrics_info",
        "Engine version information"
    );

    gauge!("fleet_metrics_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record one pod scrape; `result` is `ok`, `fetch_error` or `parse_error`
pub fn record_scrape(application: &str, result: &'static str) {
    counter!(
        "fleet_metrics_scrapes_total",
        "application" => application.to_string(),
        "result" => result,
    )
    .increment(1);
}

pub fn record_cycle(application: &str) {
    counter!(
        "fleet_metrics_cycles_total",
        "application" => application.to_string(),
    )
    .increment(1);
}

/// Record a persist call and its latency
pub fn record_persist(application: &str, outcome: &'static str, duration: Duration) {
    counter!(
        "fleet_metrics_persist_total",
        "application" => application.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
    histogram!(
        "fleet_metrics_persist_duration_seconds",
        "application" => application.to_string(),
    )
    .record(duration.as_secs_f64());
}

pub fn set_active_pollers(count: usize) {
    gauge!("fleet_metrics_active_pollers").set(count as f64);
}
