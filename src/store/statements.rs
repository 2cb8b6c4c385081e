//! Per-pod schema and SQL text
//!
//! Each pod gets four tables named after its sanitized name:
//!
//! - `{pod}`: one row per metric family per collection
//! - `{pod}_values`: samples, cascading from the metric row
//! - `{pod}_labels`: labels, cascading from the sample row
//! - `{pod}_time_load`: ledger of distinct collection times
//!
//! A [`StatementSet`] renders every statement once. sqlx keeps the prepared
//! form in each connection's statement cache, keyed by this text.

use sqlx::SqlitePool;

use super::{sanitize_name, StoreError, RETENTION_SNAPSHOTS};

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[derive(Debug, Clone)]
pub struct StatementSet {
    prefix: String,
    pub metrics_table: String,
    pub values_table: String,
    pub labels_table: String,
    pub time_table: String,

    pub insert_time: String,
    pub select_boundary: String,
    pub select_times: String,
    pub delete_times_through: String,
    pub delete_metrics_through: String,
    pub delete_metrics_at: String,
    pub delete_orphan_values: String,
    pub delete_orphan_labels: String,
    pub insert_metric: String,
    pub insert_value: String,
    pub insert_label: String,
    pub select_names: String,
    pub select_detail: String,
}

impl StatementSet {
    pub fn new(pod: &str) -> Self {
        let prefix = sanitize_name(pod);
        let metrics_table = quote(&prefix);
        let values_table = quote(&format!("{}_values", prefix));
        let labels_table = quote(&format!("{}_labels", prefix));
        let time_table = quote(&format!("{}_time_load", prefix));

        Self {
            insert_time: format!("INSERT OR IGNORE INTO {} (time_entry) VALUES (?)", time_table),
            select_boundary: format!(
                "SELECT time_entry FROM {} ORDER BY time_entry DESC LIMIT 1 OFFSET {}",
                time_table, RETENTION_SNAPSHOTS
            ),
            select_times: format!("SELECT time_entry FROM {} ORDER BY time_entry DESC", time_table),
            delete_times_through: format!("DELETE FROM {} WHERE time_entry <= ?", time_table),
            delete_metrics_through: format!(
                "DELETE FROM {} WHERE collection_time <= ?",
                metrics_table
            ),
            delete_metrics_at: format!("DELETE FROM {} WHERE collection_time = ?", metrics_table),
            delete_orphan_values: format!(
                "DELETE FROM {v} WHERE metric_id NOT IN (SELECT id FROM {m})",
                v = values_table,
                m = metrics_table
            ),
            delete_orphan_labels: format!(
                "DELETE FROM {l} WHERE value_id NOT IN (SELECT id FROM {v})",
                l = labels_table,
                v = values_table
            ),
            insert_metric: format!(
                "INSERT INTO {} (name, help, kind, collection_time) VALUES (?, ?, ?, ?)",
                metrics_table
            ),
            insert_value: format!(
                "INSERT INTO {} (metric_id, value, measure) VALUES (?, ?, ?)",
                values_table
            ),
            insert_label: format!(
                "INSERT INTO {} (value_id, key, value) VALUES (?, ?, ?)",
                labels_table
            ),
            select_names: format!("SELECT DISTINCT name FROM {} ORDER BY name", metrics_table),
            select_detail: format!(
                "SELECT m.collection_time, m.help, m.kind, v.id, v.value, v.measure, l.key, l.value \
                 FROM {m} m \
                 JOIN {v} v ON v.metric_id = m.id \
                 LEFT JOIN {l} l ON l.value_id = v.id \
                 WHERE m.name = ? \
                 ORDER BY m.collection_time, v.id, l.id",
                m = metrics_table,
                v = values_table,
                l = labels_table
            ),
            prefix,
            metrics_table,
            values_table,
            labels_table,
            time_table,
        }
    }

    /// Sanitized pod name used as the table prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn schema(&self) -> Vec<String> {
        let p = &self.prefix;
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    help TEXT NOT NULL DEFAULT '',
                    kind TEXT NOT NULL,
                    collection_time TEXT NOT NULL
                )",
                self.metrics_table
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    metric_id INTEGER NOT NULL REFERENCES {}(id) ON DELETE CASCADE,
                    value TEXT NOT NULL,
                    measure TEXT NOT NULL
                )",
                self.values_table, self.metrics_table
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    value_id INTEGER NOT NULL REFERENCES {}(id) ON DELETE CASCADE,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL
                )",
                self.labels_table, self.values_table
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (time_entry TEXT PRIMARY KEY)",
                self.time_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (collection_time)",
                quote(&format!("idx_{}_currenttime", p)),
                self.metrics_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (name)",
                quote(&format!("idx_{}_name", p)),
                self.metrics_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (metric_id)",
                quote(&format!("idx_{}_values_metric_id", p)),
                self.values_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (value_id)",
                quote(&format!("idx_{}_labels_value_id", p)),
                self.labels_table
            ),
        ]
    }

    /// Create the pod's tables and indexes if they do not exist yet
    pub async fn provision(&self, pool: &SqlitePool) -> Result<(), StoreError> {
        let mut tx = pool.begin().await?;
        for ddl in self.schema() {
            sqlx::query(&ddl).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::debug!(pod = %self.prefix, "Provisioned pod tables");
        Ok(())
    }

    /// Whether the pod's metric table is present in the store
    pub async fn exists(&self, pool: &SqlitePool) -> Result<bool, StoreError> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(&self.prefix)
                .fetch_optional(pool)
                .await?;
        Ok(found.is_some())
    }
}
