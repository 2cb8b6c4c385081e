//! Persisted per-application sync flags (`app_sync.db`)

use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;

use super::{open_pool, StoreError};

pub const CONTROL_DB_FILE: &str = "app_sync.db";

pub struct ControlStore {
    pool: SqlitePool,
}

impl ControlStore {
    /// Open the control store under `data_dir` and create its table
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|source| StoreError::DataDir {
                path: data_dir.to_path_buf(),
                source,
            })?;

        let pool = open_pool(&data_dir.join(CONTROL_DB_FILE)).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS app_sync (
                app_name TEXT PRIMARY KEY,
                sync_trigger INTEGER NOT NULL DEFAULT 1
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Insert a default (ON) row for every application that has none
    pub async fn seed(&self, applications: &[String]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for app in applications {
            sqlx::query("INSERT OR IGNORE INTO app_sync (app_name) VALUES (?)")
                .bind(app)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn set(&self, application: &str, enabled: bool) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO app_sync (app_name, sync_trigger) VALUES (?, ?)
             ON CONFLICT(app_name) DO UPDATE SET sync_trigger = excluded.sync_trigger",
        )
        .bind(application)
        .bind(enabled as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_all(&self, enabled: bool) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE app_sync SET sync_trigger = ?")
            .bind(enabled as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn get(&self, application: &str) -> Result<Option<bool>, StoreError> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT sync_trigger FROM app_sync WHERE app_name = ?")
                .bind(application)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.map(|v| v != 0))
    }

    /// Every row of the table
    pub async fn load_all(&self) -> Result<BTreeMap<String, bool>, StoreError> {
        let rows = sqlx::query("SELECT app_name, sync_trigger FROM app_sync")
            .fetch_all(&self.pool)
            .await?;

        let mut flags = BTreeMap::new();
        for row in rows {
            let app: String = row.try_get("app_name")?;
            let trigger: i64 = row.try_get("sync_trigger")?;
            flags.insert(app, trigger != 0);
        }
        Ok(flags)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apps() -> Vec<String> {
        vec!["karmada-scheduler".to_string(), "karmada-agent".to_string()]
    }

    #[tokio::test]
    async fn test_seed_defaults_to_on() {
        let dir = tempfile::tempdir().unwrap();
        let control = ControlStore::open(dir.path()).await.unwrap();
        control.seed(&apps()).await.unwrap();

        let flags = control.load_all().await.unwrap();
        assert_eq!(flags.len(), 2);
        assert!(flags.values().all(|on| *on));
        assert!(dir.path().join(CONTROL_DB_FILE).exists());
    }

    #[tokio::test]
    async fn test_seed_keeps_existing_flags() {
        let dir = tempfile::tempdir().unwrap();
        let control = ControlStore::open(dir.path()).await.unwrap();
        control.seed(&apps()).await.unwrap();
        control.set("karmada-agent", false).await.unwrap();

        control.seed(&apps()).await.unwrap();
        assert_eq!(control.get("karmada-agent").await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_flags_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let control = ControlStore::open(dir.path()).await.unwrap();
            control.seed(&apps()).await.unwrap();
            control.set("karmada-scheduler", false).await.unwrap();
            control.close().await;
        }

        let control = ControlStore::open(dir.path()).await.unwrap();
        assert_eq!(control.get("karmada-scheduler").await.unwrap(), Some(false));
        assert_eq!(control.get("karmada-agent").await.unwrap(), Some(true));
        assert_eq!(control.get("unknown").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_all() {
        let dir = tempfile::tempdir().unwrap();
        let control = ControlStore::open(dir.path()).await.unwrap();
        control.seed(&apps()).await.unwrap();

        assert_eq!(control.set_all(false).await.unwrap(), 2);
        assert!(control.load_all().await.unwrap().values().all(|on| !*on));
    }
}
