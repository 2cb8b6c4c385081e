//! One resolve, fetch, parse and enqueue pass over an application's pods

use futures::future::join_all;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::CollectError;
use crate::cluster::{MetricsFetcher, PollTarget, TargetResolver};
use crate::exposition::{parse_payload, Snapshot};
use crate::store::{IngestQueue, PersistRequest};

/// What one cycle produced: snapshots per cluster and pod, plus every
/// non-fatal error met on the way
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub application: String,
    pub snapshots: BTreeMap<String, BTreeMap<String, Snapshot>>,
    pub errors: Vec<String>,
}

impl CycleReport {
    pub fn success_count(&self) -> usize {
        self.snapshots.values().map(BTreeMap::len).sum()
    }

    /// Zero successes with at least one error is an aggregate failure
    pub fn into_result(self) -> Result<Self, CollectError> {
        if self.success_count() == 0 && !self.errors.is_empty() {
            return Err(CollectError::AllTargetsFailed {
                application: self.application,
                errors: self.errors,
            });
        }
        Ok(self)
    }
}

/// Key of the error list in the serialized report
pub const ERRORS_KEY: &str = "errors";

/// `{"<cluster>": {"<pod>": snapshot}, "errors": [...]}`
///
/// A cluster named like the error list is left out and reported in it.
impl Serialize for CycleReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        let mut errors = self.errors.clone();
        for (cluster, pods) in &self.snapshots {
            if cluster == ERRORS_KEY {
                errors.push(format!(
                    "Cluster {}: {} snapshot(s) omitted, name clashes with the error list",
                    cluster,
                    pods.len()
                ));
                continue;
            }
            map.serialize_entry(cluster, pods)?;
        }
        map.serialize_entry(ERRORS_KEY, &errors)?;
        map.end()
    }
}

pub struct CycleRunner {
    resolver: TargetResolver,
    fetcher: Arc<MetricsFetcher>,
    queue: IngestQueue,
}

impl CycleRunner {
    pub fn new(resolver: TargetResolver, fetcher: MetricsFetcher, queue: IngestQueue) -> Self {
        Self {
            resolver,
            fetcher: Arc::new(fetcher),
            queue,
        }
    }

    /// Run one cycle for `application`
    ///
    /// Pods are scraped concurrently. A failing pod only adds an entry to the
    /// report's error list. Per-pod tasks are detached, so if the caller is
    /// cancelled they still finish and enqueue what they fetched.
    pub async fn run_cycle(&self, application: &str) -> CycleReport {
        crate::metrics::record_cycle(application);

        let resolution = self.resolver.resolve(application).await;
        let errors = Arc::new(Mutex::new(resolution.errors.clone()));

        let tasks = resolution
            .poll_targets(application)
            .into_iter()
            .map(|target| {
                let fetcher = self.fetcher.clone();
                let queue = self.queue.clone();
                let errors = errors.clone();
                tokio::spawn(async move {
                    match collect_target(&fetcher, &queue, &target).await {
                        Ok(snapshot) => Some((target, snapshot)),
                        Err(e) => {
                            tracing::warn!(
                                application = %target.application_name,
                                cluster = %target.cluster_name,
                                pod = %target.pod_name,
                                error = %e,
                                "Pod collection failed"
                            );
                            errors.lock().await.push(e);
                            None
                        }
                    }
                })
            });

        let mut report = CycleReport {
            application: application.to_string(),
            ..Default::default()
        };

        for joined in join_all(tasks).await {
            match joined {
                Ok(Some((target, snapshot))) => {
                    report
                        .snapshots
                        .entry(target.cluster_name)
                        .or_default()
                        .insert(target.pod_name, snapshot);
                }
                Ok(None) => {}
                Err(e) => errors.lock().await.push(format!("Collection task failed: {}", e)),
            }
        }

        report.errors = std::mem::take(&mut *errors.lock().await);

        tracing::debug!(
            application = %application,
            pods = report.success_count(),
            errors = report.errors.len(),
            "Cycle complete"
        );
        report
    }
}

async fn collect_target(
    fetcher: &MetricsFetcher,
    queue: &IngestQueue,
    target: &PollTarget,
) -> Result<Snapshot, String> {
    let app = &target.application_name;
    let raw = fetcher.fetch(target).await.map_err(|e| {
        crate::metrics::record_scrape(app, "fetch_error");
        format!(
            "Pod {} in cluster {}: failed to fetch metrics: {}",
            target.pod_name, target.cluster_name, e
        )
    })?;

    let snapshot = parse_payload(&raw).map_err(|e| {
        crate::metrics::record_scrape(app, "parse_error");
        format!(
            "Pod {} in cluster {}: failed to parse metrics: {}",
            target.pod_name, target.cluster_name, e
        )
    })?;
    crate::metrics::record_scrape(app, "ok");

    queue
        .enqueue(PersistRequest {
            application: app.clone(),
            pod: target.pod_name.clone(),
            snapshot: snapshot.clone(),
        })
        .await
        .map_err(|e| {
            format!(
                "Pod {} in cluster {}: {}",
                target.pod_name, target.cluster_name, e
            )
        })?;

    Ok(snapshot)
}
