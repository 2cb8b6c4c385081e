//! Registry of per-application stores and the retention write path

use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use super::{open_pool, sanitize_name, StatementSet, StoreError};
use crate::exposition::{collection_time_key, Snapshot};

/// Subdirectory of the data directory holding one database per application
///
/// Keeps application files apart from the control store, whose file name an
/// application could otherwise sanitize to.
pub const STORES_DIR: &str = "stores";

/// Result of a successful [`StoreManager::persist`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Stored { families: usize, samples: usize },
    /// The snapshot is older than every retained collection
    OutsideWindow,
}

/// One application's database and its per-pod statement cache
pub struct MetricsStore {
    application: String,
    path: PathBuf,
    pool: SqlitePool,
    statements: RwLock<HashMap<String, Arc<StatementSet>>>,
}

impl MetricsStore {
    async fn open(application: &str, path: PathBuf) -> Result<Self, StoreError> {
        let pool = open_pool(&path).await?;

        tracing::info!(
            application = %application,
            path = %path.display(),
            "Opened metrics store"
        );

        Ok(Self {
            application: application.to_string(),
            path,
            pool,
            statements: RwLock::new(HashMap::new()),
        })
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Statements for `pod`, provisioning its tables on first use
    pub async fn statements(&self, pod: &str) -> Result<Arc<StatementSet>, StoreError> {
        if let Some(set) = self.statements.read().await.get(pod) {
            return Ok(set.clone());
        }

        let mut cache = self.statements.write().await;
        if let Some(set) = cache.get(pod) {
            return Ok(set.clone());
        }

        let set = StatementSet::new(pod);
        self.check_prefix(&cache, pod, &set)?;
        set.provision(&self.pool).await?;
        let set = Arc::new(set);
        cache.insert(pod.to_string(), set.clone());
        Ok(set)
    }

    /// Reject a pod whose table prefix is already owned by a different pod
    fn check_prefix(
        &self,
        cache: &HashMap<String, Arc<StatementSet>>,
        pod: &str,
        set: &StatementSet,
    ) -> Result<(), StoreError> {
        let owner = cache
            .iter()
            .find(|(other, cached)| other.as_str() != pod && cached.prefix() == set.prefix());
        match owner {
            Some((other, _)) => {
                tracing::warn!(
                    application = %self.application,
                    pod = %pod,
                    other = %other,
                    prefix = %set.prefix(),
                    "Pod tables collide with another pod"
                );
                Err(StoreError::TableCollision {
                    pod: pod.to_string(),
                    other: other.clone(),
                    prefix: set.prefix().to_string(),
                })
            }
            None => Ok(()),
        }
    }

    /// Statements for `pod` only if its tables already exist
    ///
    /// Read paths use this so that querying an unknown pod never creates
    /// tables.
    pub async fn existing_statements(&self, pod: &str) -> Result<Option<Arc<StatementSet>>, StoreError> {
        if let Some(set) = self.statements.read().await.get(pod) {
            return Ok(Some(set.clone()));
        }

        let set = StatementSet::new(pod);
        if !set.exists(&self.pool).await? {
            return Ok(None);
        }

        let mut cache = self.statements.write().await;
        if let Some(set) = cache.get(pod) {
            return Ok(Some(set.clone()));
        }
        self.check_prefix(&cache, pod, &set)?;
        let set = Arc::new(set);
        cache.insert(pod.to_string(), set.clone());
        Ok(Some(set))
    }

    /// Drop the cached statements for `pod`; returns whether one was cached
    pub async fn invalidate(&self, pod: &str) -> bool {
        self.statements.write().await.remove(pod).is_some()
    }

    /// Write one snapshot and enforce the retention window, atomically
    pub async fn persist(&self, pod: &str, snapshot: &Snapshot) -> Result<PersistOutcome, StoreError> {
        let s = self.statements(pod).await?;
        let time = collection_time_key(&snapshot.collection_time);

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(&s.insert_time)
            .bind(&time)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if inserted == 0 {
            // Same collection time seen before: replace its rows
            sqlx::query(&s.delete_metrics_at)
                .bind(&time)
                .execute(&mut *tx)
                .await?;
        }

        let boundary: Option<String> = sqlx::query_scalar(&s.select_boundary)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(boundary) = &boundary {
            sqlx::query(&s.delete_times_through)
                .bind(boundary)
                .execute(&mut *tx)
                .await?;
            sqlx::query(&s.delete_metrics_through)
                .bind(boundary)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(&s.delete_orphan_values).execute(&mut *tx).await?;
        sqlx::query(&s.delete_orphan_labels).execute(&mut *tx).await?;

        if boundary.as_deref().is_some_and(|b| time.as_str() <= b) {
            tx.commit().await?;
            return Ok(PersistOutcome::OutsideWindow);
        }

        let mut samples = 0;
        for family in snapshot.families.values() {
            let metric_id = sqlx::query(&s.insert_metric)
                .bind(&family.name)
                .bind(&family.help)
                .bind(family.kind.as_str())
                .bind(&time)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid();

            for sample in &family.samples {
                let value_id = sqlx::query(&s.insert_value)
                    .bind(metric_id)
                    .bind(&sample.value)
                    .bind(sample.measure_kind.as_str())
                    .execute(&mut *tx)
                    .await?
                    .last_insert_rowid();

                for (key, value) in &sample.label_set {
                    sqlx::query(&s.insert_label)
                        .bind(value_id)
                        .bind(key)
                        .bind(value)
                        .execute(&mut *tx)
                        .await?;
                }
                samples += 1;
            }
        }

        tx.commit().await?;

        Ok(PersistOutcome::Stored {
            families: snapshot.families.len(),
            samples,
        })
    }

    /// Retained collection times for `pod`, newest first
    pub async fn distinct_times(&self, pod: &str) -> Result<Vec<String>, StoreError> {
        let Some(s) = self.existing_statements(pod).await? else {
            return Ok(Vec::new());
        };

        let times = sqlx::query_scalar(&s.select_times)
            .fetch_all(&self.pool)
            .await?;
        Ok(times)
    }

    pub async fn close(&self) {
        self.statements.write().await.clear();
        self.pool.close().await;
    }
}

/// Lazily opened stores, one per sanitized application name
pub struct StoreManager {
    data_dir: PathBuf,
    stores: RwLock<HashMap<String, Arc<MetricsStore>>>,
}

impl StoreManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Database file backing `application`
    pub fn store_path(&self, application: &str) -> PathBuf {
        self.data_dir
            .join(STORES_DIR)
            .join(format!("{}.db", sanitize_name(application)))
    }

    /// Store for `application`, opened and registered on first access
    pub async fn store(&self, application: &str) -> Result<Arc<MetricsStore>, StoreError> {
        let key = sanitize_name(application);
        if let Some(store) = self.stores.read().await.get(&key) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(&key) {
            return Ok(store.clone());
        }

        let dir = self.data_dir.join(STORES_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::DataDir { path: dir, source })?;

        let store = Arc::new(MetricsStore::open(application, self.store_path(application)).await?);
        stores.insert(key, store.clone());
        Ok(store)
    }

    /// Store for `application` only if its file already exists
    pub async fn existing_store(&self, application: &str) -> Result<Option<Arc<MetricsStore>>, StoreError> {
        if let Some(store) = self.stores.read().await.get(&sanitize_name(application)) {
            return Ok(Some(store.clone()));
        }
        if !self.store_path(application).exists() {
            return Ok(None);
        }
        self.store(application).await.map(Some)
    }

    /// Persist one pod's snapshot
    ///
    /// Must only be called from the ingestion queue consumer so that writes
    /// to a store stay serialized.
    pub async fn persist(
        &self,
        application: &str,
        pod: &str,
        snapshot: &Snapshot,
    ) -> Result<PersistOutcome, StoreError> {
        let start = Instant::now();
        let result = match self.store(application).await {
            Ok(store) => store.persist(pod, snapshot).await,
            Err(e) => Err(e),
        };
        let elapsed = start.elapsed();

        match &result {
            Ok(PersistOutcome::Stored { families, samples }) => {
                tracing::debug!(
                    application = %application,
                    pod = %pod,
                    families = families,
                    samples = samples,
                    duration_ms = elapsed.as_millis(),
                    "Persisted snapshot"
                );
                crate::metrics::record_persist(application, "stored", elapsed);
            }
            Ok(PersistOutcome::OutsideWindow) => {
                tracing::debug!(
                    application = %application,
                    pod = %pod,
                    "Skipped snapshot older than retention window"
                );
                crate::metrics::record_persist(application, "outside_window", elapsed);
            }
            Err(_) => crate::metrics::record_persist(application, "failed", elapsed),
        }

        result
    }

    pub async fn invalidate(&self, application: &str, pod: &str) -> bool {
        let store = self
            .stores
            .read()
            .await
            .get(&sanitize_name(application))
            .cloned();
        match store {
            Some(store) => store.invalidate(pod).await,
            None => false,
        }
    }

    pub async fn distinct_times(&self, application: &str, pod: &str) -> Result<Vec<String>, StoreError> {
        match self.existing_store(application).await? {
            Some(store) => store.distinct_times(pod).await,
            None => Ok(Vec::new()),
        }
    }

    /// Close every open store
    pub async fn close(&self) {
        let stores: Vec<_> = self.stores.write().await.drain().map(|(_, s)| s).collect();
        for store in stores {
            store.close().await;
            tracing::debug!(application = %store.application(), "Closed metrics store");
        }
    }
}
