//! Maps an application name to the pods currently running it

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{ClusterClient, PollTarget, ProxyScope, AGENT_APPLICATION, HOST_CLUSTER};

/// Pods found for one application, keyed by cluster, plus per-cluster errors
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    pub targets: BTreeMap<String, Vec<String>>,
    pub errors: Vec<String>,
}

impl Resolution {
    pub fn target_count(&self) -> usize {
        self.targets.values().map(Vec::len).sum()
    }

    pub fn poll_targets(&self, application: &str) -> Vec<PollTarget> {
        self.targets
            .iter()
            .flat_map(|(cluster, pods)| {
                pods.iter().map(move |pod| PollTarget {
                    cluster_name: cluster.clone(),
                    pod_name: pod.clone(),
                    application_name: application.to_string(),
                })
            })
            .collect()
    }
}

pub struct TargetResolver {
    client: Arc<dyn ClusterClient>,
    namespace: String,
}

impl TargetResolver {
    pub fn new(client: Arc<dyn ClusterClient>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Resolve `application` to (cluster, pod) pairs
    ///
    /// The agent runs inside member clusters, so it is looked up through the
    /// cluster proxy of every member in pull mode. Every other application is
    /// looked up by label in the host cluster. Failures are collected per
    /// cluster and never abort the resolution.
    pub async fn resolve(&self, application: &str) -> Resolution {
        let selector = format!("app={}", application);

        if application == AGENT_APPLICATION {
            self.resolve_members(&selector).await
        } else {
            self.resolve_host(&selector).await
        }
    }

    async fn resolve_host(&self, selector: &str) -> Resolution {
        let mut resolution = Resolution::default();

        match self
            .client
            .list_pods(&ProxyScope::Host, &self.namespace, selector)
            .await
        {
            Ok(pods) if !pods.is_empty() => {
                resolution.targets.insert(HOST_CLUSTER.to_string(), pods);
            }
            Ok(_) => {}
            Err(e) => resolution
                .errors
                .push(format!("Cluster {}: {}", HOST_CLUSTER, e)),
        }

        resolution
    }

    async fn resolve_members(&self, selector: &str) -> Resolution {
        let mut resolution = Resolution::default();

        let clusters = match self.client.list_clusters().await {
            Ok(clusters) => clusters,
            Err(e) => {
                resolution
                    .errors
                    .push(format!("Failed to list clusters: {}", e));
                return resolution;
            }
        };

        let lookups = clusters
            .into_iter()
            .filter(|c| c.is_pull_mode())
            .map(|cluster| async move {
                let scope = ProxyScope::Member(cluster.name.clone());
                let pods = self
                    .client
                    .list_pods(&scope, &self.namespace, selector)
                    .await;
                (cluster.name, pods)
            });

        for (cluster, pods) in join_all(lookups).await {
            match pods {
                Ok(pods) if !pods.is_empty() => {
                    resolution.targets.insert(cluster, pods);
                }
                Ok(_) => {}
                Err(e) => resolution.errors.push(format!("Cluster {}: {}", cluster, e)),
            }
        }

        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;

    #[tokio::test]
    async fn test_resolve_host_application() {
        let fake = FakeCluster::new()
            .with_pods(HOST_CLUSTER, "app=karmada-scheduler", &["sched-a", "sched-b"]);
        let resolver = TargetResolver::new(Arc::new(fake), "karmada-system");

        let resolution = resolver.resolve("karmada-scheduler").await;

        assert!(resolution.errors.is_empty());
        assert_eq!(
            resolution.targets[HOST_CLUSTER],
            vec!["sched-a".to_string(), "sched-b".to_string()]
        );
        let targets = resolution.poll_targets("karmada-scheduler");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].cluster_name, HOST_CLUSTER);
        assert_eq!(targets[0].application_name, "karmada-scheduler");
    }

    #[tokio::test]
    async fn test_resolve_agent_only_uses_pull_clusters() {
        let fake = FakeCluster::new()
            .with_cluster("member1", "Pull")
            .with_cluster("member2", "Push")
            .with_cluster("member3", "pull")
            .with_pods("member1", "app=karmada-agent", &["agent-1"])
            .with_pods("member2", "app=karmada-agent", &["agent-2"])
            .with_pods("member3", "app=karmada-agent", &["agent-3"]);
        let resolver = TargetResolver::new(Arc::new(fake), "karmada-system");

        let resolution = resolver.resolve(AGENT_APPLICATION).await;

        assert!(resolution.errors.is_empty());
        assert_eq!(resolution.targets.len(), 2);
        assert!(resolution.targets.contains_key("member1"));
        assert!(resolution.targets.contains_key("member3"));
        assert_eq!(resolution.target_count(), 2);
    }

    #[tokio::test]
    async fn test_cluster_errors_are_collected() {
        let fake = FakeCluster::new()
            .with_cluster("member1", "Pull")
            .with_cluster("broken", "Pull")
            .with_pods("member1", "app=karmada-agent", &["agent-1"])
            .with_failing_cluster("broken");
        let resolver = TargetResolver::new(Arc::new(fake), "karmada-system");

        let resolution = resolver.resolve(AGENT_APPLICATION).await;

        assert_eq!(resolution.target_count(), 1);
        assert_eq!(resolution.errors.len(), 1);
        assert!(resolution.errors[0].contains("broken"));
    }

    #[tokio::test]
    async fn test_empty_lookup_yields_no_targets() {
        let resolver = TargetResolver::new(Arc::new(FakeCluster::new()), "karmada-system");
        let resolution = resolver.resolve("karmada-controller-manager").await;

        assert!(resolution.targets.is_empty());
        assert!(resolution.errors.is_empty());
    }
}
