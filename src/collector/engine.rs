//! Owns every engine component and their lifecycle

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{CollectError, CycleReport, CycleRunner, PollScheduler, SyncController};
use crate::cluster::{ClusterClient, MetricsFetcher, TargetResolver};
use crate::config::Config;
use crate::store::{ControlStore, IngestWriter, QueryService, StoreManager};

pub struct Engine {
    stores: Arc<StoreManager>,
    control: Arc<ControlStore>,
    sync: Arc<SyncController>,
    runner: Arc<CycleRunner>,
    scheduler: Arc<PollScheduler>,
    query: QueryService,
    refresh_interval: Duration,
    writer: Mutex<Option<IngestWriter>>,
    refresher: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Build every component; nothing is polled until [`Engine::start`]
    pub async fn new(config: &Config, client: Arc<dyn ClusterClient>) -> Result<Self, CollectError> {
        let collector = &config.collector;
        let namespace = config.cluster.namespace.clone();

        let stores = Arc::new(StoreManager::new(&collector.data_dir));
        let control = Arc::new(ControlStore::open(&collector.data_dir).await?);
        let sync = Arc::new(SyncController::new(control.clone(), collector.applications.clone()).await?);

        let (queue, writer) = IngestWriter::spawn(stores.clone(), collector.queue_capacity());
        let runner = Arc::new(CycleRunner::new(
            TargetResolver::new(client.clone(), namespace.clone()),
            MetricsFetcher::new(client, namespace),
            queue,
        ));
        let scheduler = Arc::new(PollScheduler::new(
            runner.clone(),
            sync.clone(),
            collector.poll_interval(),
        ));

        tracing::info!(
            applications = collector.applications.len(),
            data_dir = %collector.data_dir.display(),
            queue_capacity = collector.queue_capacity(),
            "Metrics engine initialized"
        );

        Ok(Self {
            query: QueryService::new(stores.clone()),
            stores,
            control,
            sync,
            runner,
            scheduler,
            refresh_interval: collector.sync_refresh_interval(),
            writer: Mutex::new(Some(writer)),
            refresher: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// Start a loop for every application whose flag is on, and the
    /// background refresher
    pub async fn start(&self) {
        self.scheduler.reconcile().await;

        let mut refresher = self.refresher.lock().await;
        if refresher.is_none() {
            *refresher = Some(tokio::spawn(refresh_loop(
                self.sync.clone(),
                self.scheduler.clone(),
                self.refresh_interval,
                self.shutdown.clone(),
            )));
        }

        let active = self.scheduler.active_loops().await;
        tracing::info!(active = ?active, "Metrics engine started");
    }

    /// Turn sync on or off for one application or `all`, then reconcile loops
    pub async fn set_sync(&self, target: &str, enabled: bool) -> Result<Vec<String>, CollectError> {
        let affected = self.sync.set(target, enabled).await?;
        if !self.shutdown.is_cancelled() {
            self.scheduler.reconcile().await;
        }
        Ok(affected)
    }

    pub fn sync_status(&self, application: &str) -> Result<bool, CollectError> {
        self.sync.get_status(application)
    }

    /// Run one on-demand cycle outside the poll loops
    pub async fn run_cycle(&self, application: &str) -> CycleReport {
        self.runner.run_cycle(application).await
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    pub fn stores(&self) -> &Arc<StoreManager> {
        &self.stores
    }

    pub fn sync(&self) -> &Arc<SyncController> {
        &self.sync
    }

    pub async fn active_loops(&self) -> Vec<String> {
        self.scheduler.active_loops().await
    }

    /// Stop pollers, flush the queue and close every store
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        if let Some(handle) = self.refresher.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Sync refresher task failed");
            }
        }

        self.scheduler.stop_all().await;

        if let Some(writer) = self.writer.lock().await.take() {
            let processed = writer.shutdown().await;
            tracing::info!(processed = processed, "Ingestion queue drained");
        }

        self.stores.close().await;
        self.control.close().await;
        tracing::info!("Metrics engine stopped");
    }
}

async fn refresh_loop(
    sync: Arc<SyncController>,
    scheduler: Arc<PollScheduler>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; the view was loaded at startup
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match sync.refresh().await {
            Ok(()) => scheduler.reconcile().await,
            Err(e) => tracing::warn!(error = %e, "Failed to refresh sync flags"),
        }
    }

    tracing::debug!("Sync refresher task shutting down");
}
