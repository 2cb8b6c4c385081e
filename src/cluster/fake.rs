//! In-memory cluster used by unit tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{ClusterClient, ClusterError, ClusterInfo, ProxyScope, HOST_CLUSTER};

#[derive(Default)]
pub(crate) struct FakeCluster {
    clusters: Vec<ClusterInfo>,
    pods: Mutex<HashMap<(String, String), Vec<String>>>,
    metrics: Mutex<HashMap<String, Vec<u8>>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<(ProxyScope, String, u16)>>,
}

fn scope_name(scope: &ProxyScope) -> &str {
    match scope {
        ProxyScope::Host => HOST_CLUSTER,
        ProxyScope::Member(name) => name,
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster(mut self, name: &str, sync_mode: &str) -> Self {
        self.clusters.push(ClusterInfo {
            name: name.to_string(),
            sync_mode: sync_mode.to_string(),
        });
        self
    }

    pub fn with_pods(self, cluster: &str, selector: &str, pods: &[&str]) -> Self {
        self.set_pods(cluster, selector, pods);
        self
    }

    pub fn with_metrics(self, pod: &str, body: &str) -> Self {
        self.set_metrics(pod, body);
        self
    }

    pub fn with_raw_metrics(self, pod: &str, body: &[u8]) -> Self {
        self.metrics
            .lock()
            .unwrap()
            .insert(pod.to_string(), body.to_vec());
        self
    }

    pub fn with_failing_cluster(mut self, cluster: &str) -> Self {
        self.failing.insert(cluster.to_string());
        self
    }

    pub fn set_pods(&self, cluster: &str, selector: &str, pods: &[&str]) {
        self.pods.lock().unwrap().insert(
            (cluster.to_string(), selector.to_string()),
            pods.iter().map(|p| p.to_string()).collect(),
        );
    }

    pub fn set_metrics(&self, pod: &str, body: &str) {
        self.metrics
            .lock()
            .unwrap()
            .insert(pod.to_string(), body.as_bytes().to_vec());
    }

    pub fn metric_calls(&self) -> Vec<(ProxyScope, String, u16)> {
        self.calls.lock().unwrap().clone()
    }

    fn failure(&self, what: &str) -> ClusterError {
        ClusterError::Status {
            url: what.to_string(),
            status: 503,
            body: "unavailable".to_string(),
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ClusterError> {
        Ok(self.clusters.clone())
    }

    async fn list_pods(
        &self,
        scope: &ProxyScope,
        _namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let cluster = scope_name(scope);
        if self.failing.contains(cluster) {
            return Err(self.failure(cluster));
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(&(cluster.to_string(), label_selector.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn pod_metrics(
        &self,
        scope: &ProxyScope,
        _namespace: &str,
        pod: &str,
        port: u16,
    ) -> Result<Vec<u8>, ClusterError> {
        self.calls
            .lock()
            .unwrap()
            .push((scope.clone(), pod.to_string(), port));

        self.metrics
            .lock()
            .unwrap()
            .get(pod)
            .cloned()
            .ok_or_else(|| self.failure(pod))
    }
}
