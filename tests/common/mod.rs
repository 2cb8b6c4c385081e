//! Shared helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use fleet_metrics::cluster::{ClusterClient, ClusterError, ClusterInfo, ProxyScope, HOST_CLUSTER};
use fleet_metrics::collector::Engine;
use fleet_metrics::config::Config;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Cluster whose pods and metric bodies are set by the test
#[derive(Default)]
pub struct StaticCluster {
    pub clusters: Vec<ClusterInfo>,
    pods: Mutex<HashMap<(String, String), Vec<String>>>,
    bodies: Mutex<HashMap<String, String>>,
}

impl StaticCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pull_member(mut self, name: &str) -> Self {
        self.clusters.push(ClusterInfo {
            name: name.to_string(),
            sync_mode: "Pull".to_string(),
        });
        self
    }

    pub fn pods(self, cluster: &str, application: &str, pods: &[&str]) -> Self {
        self.pods.lock().unwrap().insert(
            (cluster.to_string(), format!("app={}", application)),
            pods.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn body(self, pod: &str, body: &str) -> Self {
        self.set_body(pod, body);
        self
    }

    pub fn set_body(&self, pod: &str, body: &str) {
        self.bodies
            .lock()
            .unwrap()
            .insert(pod.to_string(), body.to_string());
    }
}

#[async_trait]
impl ClusterClient for StaticCluster {
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ClusterError> {
        Ok(self.clusters.clone())
    }

    async fn list_pods(
        &self,
        scope: &ProxyScope,
        _namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let cluster = match scope {
            ProxyScope::Host => HOST_CLUSTER.to_string(),
            ProxyScope::Member(name) => name.clone(),
        };
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(&(cluster, label_selector.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn pod_metrics(
        &self,
        _scope: &ProxyScope,
        _namespace: &str,
        pod: &str,
        _port: u16,
    ) -> Result<Vec<u8>, ClusterError> {
        self.bodies
            .lock()
            .unwrap()
            .get(pod)
            .map(|b| b.as_bytes().to_vec())
            .ok_or_else(|| ClusterError::Status {
                url: format!("/pods/{}/proxy/metrics", pod),
                status: 404,
                body: "not found".to_string(),
            })
    }
}

pub const SCHEDULER_TEXT: &str = "\
# HELP scheduler_schedule_attempts_total Number of attempts to schedule resourceBinding
# TYPE scheduler_schedule_attempts_total counter
scheduler_schedule_attempts_total{result=\"scheduled\",schedule_type=\"ReconcileSchedule\"} 12
scheduler_schedule_attempts_total{result=\"error\",schedule_type=\"ReconcileSchedule\"} 1
# HELP scheduler_e2e_scheduling_duration_seconds E2E scheduling latency in seconds
# TYPE scheduler_e2e_scheduling_duration_seconds histogram
scheduler_e2e_scheduling_duration_seconds_bucket{result=\"scheduled\",le=\"0.001\"} 3
scheduler_e2e_scheduling_duration_seconds_bucket{result=\"scheduled\",le=\"0.01\"} 10
scheduler_e2e_scheduling_duration_seconds_bucket{result=\"scheduled\",le=\"+Inf\"} 13
scheduler_e2e_scheduling_duration_seconds_sum{result=\"scheduled\"} 0.052
scheduler_e2e_scheduling_duration_seconds_count{result=\"scheduled\"} 13
# HELP go_goroutines Number of goroutines that currently exist.
# TYPE go_goroutines gauge
go_goroutines 87
";

pub fn test_config(dir: &tempfile::TempDir, applications: &[&str]) -> Config {
    let mut config = Config::default();
    config.collector.applications = applications.iter().map(|a| a.to_string()).collect();
    config.collector.data_dir = dir.path().to_path_buf();
    config.collector.poll_interval_ms = 20;
    config.collector.sync_refresh_interval_ms = 50;
    config
}

pub async fn engine(dir: &tempfile::TempDir, applications: &[&str], cluster: StaticCluster) -> Arc<Engine> {
    Arc::new(
        Engine::new(&test_config(dir, applications), Arc::new(cluster))
            .await
            .unwrap(),
    )
}
