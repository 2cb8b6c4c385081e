//! One poll loop per application, started and stopped at runtime

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{CycleRunner, SyncController};

struct LoopHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PollScheduler {
    runner: Arc<CycleRunner>,
    sync: Arc<SyncController>,
    interval: Duration,
    root: CancellationToken,
    // Held across start/stop so transitions never interleave
    loops: Mutex<HashMap<String, LoopHandle>>,
}

impl PollScheduler {
    pub fn new(runner: Arc<CycleRunner>, sync: Arc<SyncController>, interval: Duration) -> Self {
        Self {
            runner,
            sync,
            interval,
            root: CancellationToken::new(),
            loops: Mutex::new(HashMap::new()),
        }
    }

    /// Start the loop for `application`; returns false if it was already running
    pub async fn start(&self, application: &str) -> bool {
        let mut loops = self.loops.lock().await;

        if let Some(existing) = loops.get(application) {
            if !existing.handle.is_finished() {
                return false;
            }
        }

        let token = self.root.child_token();
        let handle = tokio::spawn(poll_loop(
            application.to_string(),
            self.runner.clone(),
            self.sync.clone(),
            self.interval,
            token.clone(),
        ));
        loops.insert(application.to_string(), LoopHandle { token, handle });

        tracing::info!(application = %application, "Poller started");
        crate::metrics::set_active_pollers(live_count(&loops));
        true
    }

    /// Cancel the loop for `application` and wait for it to exit; returns
    /// false if no loop was running
    pub async fn stop(&self, application: &str) -> bool {
        let mut loops = self.loops.lock().await;

        let Some(LoopHandle { token, handle }) = loops.remove(application) else {
            return false;
        };

        token.cancel();
        if let Err(e) = handle.await {
            tracing::error!(application = %application, error = %e, "Poller task failed");
        }

        tracing::info!(application = %application, "Poller stopped");
        crate::metrics::set_active_pollers(live_count(&loops));
        true
    }

    /// Bring running loops in line with the sync view
    pub async fn reconcile(&self) {
        for (application, enabled) in self.sync.snapshot() {
            if enabled {
                self.start(&application).await;
            } else {
                self.stop(&application).await;
            }
        }
    }

    /// Applications with a live loop, sorted
    pub async fn active_loops(&self) -> Vec<String> {
        let loops = self.loops.lock().await;
        let mut active: Vec<String> = loops
            .iter()
            .filter(|(_, l)| !l.handle.is_finished())
            .map(|(app, _)| app.clone())
            .collect();
        active.sort();
        active
    }

    /// Cancel every loop and wait for all of them
    pub async fn stop_all(&self) {
        self.root.cancel();

        let drained: Vec<_> = self.loops.lock().await.drain().collect();
        for (application, LoopHandle { handle, .. }) in drained {
            if let Err(e) = handle.await {
                tracing::error!(application = %application, error = %e, "Poller task failed");
            }
        }

        crate::metrics::set_active_pollers(0);
        tracing::info!("All pollers stopped");
    }
}

/// Loops whose task has not exited yet
fn live_count(loops: &HashMap<String, LoopHandle>) -> usize {
    loops.values().filter(|l| !l.handle.is_finished()).count()
}

async fn poll_loop(
    application: String,
    runner: Arc<CycleRunner>,
    sync: Arc<SyncController>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !sync.is_enabled(&application) {
            tracing::trace!(application = %application, "Sync off, skipping tick");
            continue;
        }

        tokio::select! {
            _ = token.cancelled() => break,
            report = runner.run_cycle(&application) => {
                if !report.errors.is_empty() {
                    tracing::debug!(
                        application = %application,
                        pods = report.success_count(),
                        errors = report.errors.len(),
                        "Cycle finished with errors"
                    );
                }
            }
        }
    }

    tracing::debug!(application = %application, "Poll loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::cluster::{MetricsFetcher, TargetResolver, HOST_CLUSTER};
    use crate::store::{ControlStore, IngestWriter, StoreManager};

    const APP: &str = "karmada-scheduler";

    struct Harness {
        _dir: tempfile::TempDir,
        stores: Arc<StoreManager>,
        sync: Arc<SyncController>,
        scheduler: PollScheduler,
        writer: IngestWriter,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let stores = Arc::new(StoreManager::new(dir.path()));
        let control = Arc::new(ControlStore::open(dir.path()).await.unwrap());
        let sync = Arc::new(
            SyncController::new(control, vec![APP.to_string()])
                .await
                .unwrap(),
        );
        let (queue, writer) = IngestWriter::spawn(stores.clone(), 2);

        let fake = Arc::new(
            FakeCluster::new()
                .with_pods(HOST_CLUSTER, "app=karmada-scheduler", &["sched-a"])
                .with_metrics("sched-a", "up 1\n"),
        );
        let runner = Arc::new(CycleRunner::new(
            TargetResolver::new(fake.clone(), "karmada-system"),
            MetricsFetcher::new(fake, "karmada-system"),
            queue,
        ));
        let scheduler = PollScheduler::new(runner, sync.clone(), Duration::from_millis(10));

        Harness {
            _dir: dir,
            stores,
            sync,
            scheduler,
            writer,
        }
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let h = harness().await;

        assert!(h.scheduler.start(APP).await);
        assert!(!h.scheduler.start(APP).await);
        assert_eq!(h.scheduler.active_loops().await, vec![APP]);

        h.scheduler.stop_all().await;
        assert!(h.scheduler.active_loops().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_then_start_leaves_one_loop() {
        let h = harness().await;
        h.scheduler.start(APP).await;

        assert!(h.scheduler.stop(APP).await);
        assert!(!h.scheduler.stop(APP).await);
        assert!(h.scheduler.start(APP).await);

        assert_eq!(h.scheduler.active_loops().await.len(), 1);
        h.scheduler.stop_all().await;
    }

    #[tokio::test]
    async fn test_reconcile_follows_sync_view() {
        let h = harness().await;

        h.scheduler.reconcile().await;
        assert_eq!(h.scheduler.active_loops().await, vec![APP]);

        h.sync.set(APP, false).await.unwrap();
        h.scheduler.reconcile().await;
        assert!(h.scheduler.active_loops().await.is_empty());

        h.sync.set(APP, true).await.unwrap();
        h.scheduler.reconcile().await;
        h.scheduler.reconcile().await;
        assert_eq!(h.scheduler.active_loops().await, vec![APP]);

        h.scheduler.stop_all().await;
    }

    #[tokio::test]
    async fn test_running_loop_persists_snapshots() {
        let h = harness().await;
        h.scheduler.start(APP).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        h.scheduler.stop_all().await;
        h.writer.shutdown().await;

        let times = h.stores.distinct_times(APP, "sched-a").await.unwrap();
        assert!(!times.is_empty());
        assert!(times.len() <= 5);
    }

    #[tokio::test]
    async fn test_loop_skips_ticks_while_off() {
        let h = harness().await;
        h.sync.set(APP, false).await.unwrap();
        h.scheduler.start(APP).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        h.scheduler.stop_all().await;
        h.writer.shutdown().await;

        assert!(h.stores.distinct_times(APP, "sched-a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_count_skips_exited_loops() {
        let exited = tokio::spawn(async {});
        while !exited.is_finished() {
            tokio::task::yield_now().await;
        }
        let running_token = CancellationToken::new();
        let waiting = running_token.clone();
        let running = tokio::spawn(async move { waiting.cancelled().await });

        let mut loops = HashMap::new();
        loops.insert(
            "exited".to_string(),
            LoopHandle {
                token: CancellationToken::new(),
                handle: exited,
            },
        );
        loops.insert(
            "running".to_string(),
            LoopHandle {
                token: running_token.clone(),
                handle: running,
            },
        );

        assert_eq!(live_count(&loops), 1);

        running_token.cancel();
        for (_, l) in loops.drain() {
            l.handle.await.unwrap();
        }
    }
}
