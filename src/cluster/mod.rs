//! Cluster access for target discovery and scraping
//!
//! Everything that talks to the orchestration API goes through the
//! [`ClusterClient`] trait. The resolver and fetcher layer the
//! application-specific routing rules on top of it, and [`kube`] provides the
//! HTTP implementation used in production.

pub mod fetcher;
pub mod kube;
pub mod resolver;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use serde::Serialize;

pub use fetcher::{port_for, MetricsFetcher};
pub use kube::KubeClusterClient;
pub use resolver::{Resolution, TargetResolver};

/// Application whose pods live in member clusters rather than the host
pub const AGENT_APPLICATION: &str = "karmada-agent";

/// Cluster name used for pods found on the host cluster
pub const HOST_CLUSTER: &str = "karmada-host";

/// Which API server proxy a request is routed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyScope {
    /// The cluster the engine itself runs in
    Host,
    /// A member cluster reached through the control plane's cluster proxy
    Member(String),
}

/// Member cluster as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
    pub sync_mode: String,
}

impl ClusterInfo {
    pub fn is_pull_mode(&self) -> bool {
        self.sync_mode.eq_ignore_ascii_case("pull")
    }
}

/// One pod to scrape in one poll cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PollTarget {
    pub cluster_name: String,
    pub pod_name: String,
    pub application_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("credentials unavailable: {0}")]
    Credentials(String),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("no metrics port known for application {0}")]
    UnknownApplication(String),
}

impl ClusterError {
    /// Errors that will not go away by retrying the same target
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::UnknownApplication(_) | Self::Credentials(_))
    }
}

/// Narrow view of the orchestration API used by the collector
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Member clusters registered with the control plane
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ClusterError>;

    /// Names of pods in `namespace` matching `label_selector`
    async fn list_pods(
        &self,
        scope: &ProxyScope,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, ClusterError>;

    /// Raw body of the pod's `/metrics` endpoint, fetched through the proxy
    async fn pod_metrics(
        &self,
        scope: &ProxyScope,
        namespace: &str,
        pod: &str,
        port: u16,
    ) -> Result<Vec<u8>, ClusterError>;
}
