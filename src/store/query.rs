//! Read side of the metric stores

use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{StoreError, StoreManager};

/// One metric at one collection time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDetail {
    pub help: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub values: Vec<DetailValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailValue {
    pub value: String,
    pub measure: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct QueryService {
    stores: Arc<StoreManager>,
}

impl QueryService {
    pub fn new(stores: Arc<StoreManager>) -> Self {
        Self { stores }
    }

    /// Distinct metric names stored for a pod, sorted
    pub async fn list_metric_names(&self, application: &str, pod: &str) -> Result<Vec<String>, StoreError> {
        let Some(store) = self.stores.existing_store(application).await? else {
            return Ok(Vec::new());
        };
        let Some(s) = store.existing_statements(pod).await? else {
            return Ok(Vec::new());
        };

        let names = sqlx::query_scalar(&s.select_names)
            .fetch_all(store.pool())
            .await?;
        Ok(names)
    }

    /// Every table in the application's store
    pub async fn list_tables(&self, application: &str) -> Result<Vec<String>, StoreError> {
        let Some(store) = self.stores.existing_store(application).await? else {
            return Ok(Vec::new());
        };

        let tables = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(store.pool())
        .await?;
        Ok(tables)
    }

    /// Retained values of one metric, keyed by collection time
    pub async fn get_detail(
        &self,
        application: &str,
        pod: &str,
        metric_name: &str,
    ) -> Result<BTreeMap<String, MetricDetail>, StoreError> {
        let mut details = BTreeMap::new();

        let Some(store) = self.stores.existing_store(application).await? else {
            return Ok(details);
        };
        let Some(s) = store.existing_statements(pod).await? else {
            return Ok(details);
        };

        // Single read transaction so a concurrent eviction cannot split a
        // collection across the result
        let mut tx = store.pool().begin().await?;
        let rows = sqlx::query(&s.select_detail)
            .bind(metric_name)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut last_value_id = None;
        for row in rows {
            let time: String = row.try_get(0)?;
            let help: String = row.try_get(1)?;
            let kind: String = row.try_get(2)?;
            let value_id: i64 = row.try_get(3)?;
            let value: String = row.try_get(4)?;
            let measure: String = row.try_get(5)?;
            let label_key: Option<String> = row.try_get(6)?;
            let label_value: Option<String> = row.try_get(7)?;

            let detail = details.entry(time).or_insert_with(|| MetricDetail {
                help,
                kind,
                values: Vec::new(),
            });

            if last_value_id != Some(value_id) {
                detail.values.push(DetailValue {
                    value,
                    measure,
                    labels: BTreeMap::new(),
                });
                last_value_id = Some(value_id);
            }

            if let (Some(key), Some(label_value), Some(current)) =
                (label_key, label_value, detail.values.last_mut())
            {
                current.labels.insert(key, label_value);
            }
        }

        Ok(details)
    }
}
