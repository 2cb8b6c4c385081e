//! Metrics fetcher for scraping a resolved pod
//!
//! Routes the request through the right API server proxy and returns the raw
//! exposition text.

use std::sync::Arc;

use super::{ClusterClient, ClusterError, PollTarget, ProxyScope, AGENT_APPLICATION};

/// Metrics port of the scheduler and its estimators
pub const SCHEDULER_PORT: u16 = 10351;
/// Metrics port of the controller manager and the agent
pub const CONTROLLER_PORT: u16 = 8080;

/// Metrics port for an application, if it is one we know how to scrape
pub fn port_for(application: &str) -> Option<u16> {
    match application {
        "karmada-scheduler" => Some(SCHEDULER_PORT),
        app if app.starts_with("karmada-scheduler-estimator") => Some(SCHEDULER_PORT),
        "karmada-controller-manager" | AGENT_APPLICATION => Some(CONTROLLER_PORT),
        _ => None,
    }
}

pub struct MetricsFetcher {
    client: Arc<dyn ClusterClient>,
    namespace: String,
}

impl MetricsFetcher {
    pub fn new(client: Arc<dyn ClusterClient>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Fetch raw metrics text for one target
    ///
    /// # Errors
    /// Returns an error if:
    /// - The application has no known metrics port (permanent)
    /// - The proxy request fails or returns a non-success status
    /// - The body is not valid UTF-8
    pub async fn fetch(&self, target: &PollTarget) -> Result<String, ClusterError> {
        let port = port_for(&target.application_name)
            .ok_or_else(|| ClusterError::UnknownApplication(target.application_name.clone()))?;

        let scope = if target.application_name == AGENT_APPLICATION {
            ProxyScope::Member(target.cluster_name.clone())
        } else {
            ProxyScope::Host
        };

        let body = self
            .client
            .pod_metrics(&scope, &self.namespace, &target.pod_name, port)
            .await?;

        String::from_utf8(body).map_err(|e| ClusterError::Decode {
            url: format!("pods/{}:{}/proxy/metrics", target.pod_name, port),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::cluster::HOST_CLUSTER;

    fn target(cluster: &str, pod: &str, app: &str) -> PollTarget {
        PollTarget {
            cluster_name: cluster.to_string(),
            pod_name: pod.to_string(),
            application_name: app.to_string(),
        }
    }

    #[test]
    fn test_port_selection() {
        assert_eq!(port_for("karmada-scheduler"), Some(10351));
        assert_eq!(port_for("karmada-scheduler-estimator-member1"), Some(10351));
        assert_eq!(port_for("karmada-controller-manager"), Some(8080));
        assert_eq!(port_for("karmada-agent"), Some(8080));
        assert_eq!(port_for("karmada-webhook"), None);
        assert_eq!(port_for(""), None);
    }

    #[tokio::test]
    async fn test_fetch_routes_agent_through_member_proxy() {
        let fake = Arc::new(FakeCluster::new().with_metrics("agent-1", "up 1\n"));
        let fetcher = MetricsFetcher::new(fake.clone(), "karmada-system");

        let body = fetcher
            .fetch(&target("member1", "agent-1", AGENT_APPLICATION))
            .await
            .unwrap();

        assert_eq!(body, "up 1\n");
        let calls = fake.metric_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, ProxyScope::Member("member1".to_string()));
        assert_eq!(calls[0].2, CONTROLLER_PORT);
    }

    #[tokio::test]
    async fn test_fetch_routes_others_through_host_proxy() {
        let fake = Arc::new(FakeCluster::new().with_metrics("sched-a", "up 1\n"));
        let fetcher = MetricsFetcher::new(fake.clone(), "karmada-system");

        fetcher
            .fetch(&target(HOST_CLUSTER, "sched-a", "karmada-scheduler"))
            .await
            .unwrap();

        let calls = fake.metric_calls();
        assert_eq!(calls[0].0, ProxyScope::Host);
        assert_eq!(calls[0].1, "sched-a");
        assert_eq!(calls[0].2, SCHEDULER_PORT);
    }

    #[tokio::test]
    async fn test_invalid_utf8_body_is_rejected() {
        let fake = Arc::new(FakeCluster::new().with_raw_metrics("sched-a", b"up \xff\xfe1\n"));
        let fetcher = MetricsFetcher::new(fake, "karmada-system");

        let err = fetcher
            .fetch(&target(HOST_CLUSTER, "sched-a", "karmada-scheduler"))
            .await
            .unwrap_err();

        assert!(matches!(err, ClusterError::Decode { .. }));
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn test_unknown_application_is_permanent_error() {
        let fake = Arc::new(FakeCluster::new());
        let fetcher = MetricsFetcher::new(fake.clone(), "karmada-system");

        let err = fetcher
            .fetch(&target(HOST_CLUSTER, "web-1", "karmada-webhook"))
            .await
            .unwrap_err();

        assert!(err.is_permanent());
        assert!(fake.metric_calls().is_empty());
    }
}
