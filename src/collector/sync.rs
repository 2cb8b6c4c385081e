//! Runtime on/off switch for each application's poller
//!
//! The `app_sync` table is the source of truth. The in-memory view is what
//! poll loops consult on every tick; it is updated by [`SyncController::set`]
//! and re-read from the table by [`SyncController::refresh`].

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::CollectError;
use crate::store::ControlStore;

/// Target name that addresses every known application
pub const ALL_APPLICATIONS: &str = "all";

pub struct SyncController {
    control: Arc<ControlStore>,
    applications: Vec<String>,
    view: DashMap<String, bool>,
    /// Held across a table access and the view update that follows it
    apply: Mutex<()>,
}

impl SyncController {
    /// Seed missing rows and load the initial view
    pub async fn new(control: Arc<ControlStore>, applications: Vec<String>) -> Result<Self, CollectError> {
        control.seed(&applications).await?;

        let controller = Self {
            control,
            applications,
            view: DashMap::new(),
            apply: Mutex::new(()),
        };
        controller.refresh().await?;

        Ok(controller)
    }

    pub fn applications(&self) -> &[String] {
        &self.applications
    }

    pub fn is_known(&self, application: &str) -> bool {
        self.applications.iter().any(|a| a == application)
    }

    /// Persist a flag, then update the view; returns the affected applications
    pub async fn set(&self, target: &str, enabled: bool) -> Result<Vec<String>, CollectError> {
        let _apply = self.apply.lock().await;
        let affected = if target == ALL_APPLICATIONS {
            self.control.set_all(enabled).await?;
            self.applications.clone()
        } else if self.is_known(target) {
            self.control.set(target, enabled).await?;
            vec![target.to_string()]
        } else {
            return Err(CollectError::UnknownApplication(target.to_string()));
        };

        for app in &affected {
            self.view.insert(app.clone(), enabled);
        }

        tracing::info!(
            target_app = %target,
            enabled = enabled,
            affected = affected.len(),
            "Sync flag updated"
        );
        Ok(affected)
    }

    pub fn get_status(&self, application: &str) -> Result<bool, CollectError> {
        self.view
            .get(application)
            .map(|flag| *flag)
            .ok_or_else(|| CollectError::UnknownApplication(application.to_string()))
    }

    /// Flag consulted by poll loops; unknown applications are off
    pub fn is_enabled(&self, application: &str) -> bool {
        self.view.get(application).map(|flag| *flag).unwrap_or(false)
    }

    /// Re-read the table into the view
    ///
    /// Rows for applications outside the configured set are ignored; a known
    /// application whose row was removed externally is treated as ON, the
    /// column default.
    pub async fn refresh(&self) -> Result<(), CollectError> {
        let _apply = self.apply.lock().await;
        let flags = self.control.load_all().await?;

        for app in &self.applications {
            let enabled = flags.get(app).copied().unwrap_or(true);
            let previous = self.view.insert(app.clone(), enabled);
            if previous.is_some_and(|p| p != enabled) {
                tracing::info!(application = %app, enabled = enabled, "Sync flag changed externally");
            }
        }

        Ok(())
    }

    /// Current view, sorted by application
    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.view
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn controller(dir: &tempfile::TempDir) -> (Arc<ControlStore>, SyncController) {
        let control = Arc::new(ControlStore::open(dir.path()).await.unwrap());
        let apps = vec!["karmada-scheduler".to_string(), "karmada-agent".to_string()];
        let sync = SyncController::new(control.clone(), apps).await.unwrap();
        (control, sync)
    }

    #[tokio::test]
    async fn test_initial_view_is_on() {
        let dir = tempfile::tempdir().unwrap();
        let (_, sync) = controller(&dir).await;

        assert!(sync.get_status("karmada-scheduler").unwrap());
        assert!(sync.get_status("karmada-agent").unwrap());
    }

    #[tokio::test]
    async fn test_set_updates_table_and_view() {
        let dir = tempfile::tempdir().unwrap();
        let (control, sync) = controller(&dir).await;

        let affected = sync.set("karmada-agent", false).await.unwrap();

        assert_eq!(affected, vec!["karmada-agent"]);
        assert!(!sync.get_status("karmada-agent").unwrap());
        assert!(!sync.is_enabled("karmada-agent"));
        assert_eq!(control.get("karmada-agent").await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_set_all() {
        let dir = tempfile::tempdir().unwrap();
        let (_, sync) = controller(&dir).await;

        let affected = sync.set(ALL_APPLICATIONS, false).await.unwrap();

        assert_eq!(affected.len(), 2);
        assert!(sync.snapshot().values().all(|on| !*on));
    }

    #[tokio::test]
    async fn test_unknown_application() {
        let dir = tempfile::tempdir().unwrap();
        let (_, sync) = controller(&dir).await;

        assert!(matches!(
            sync.get_status("nope"),
            Err(CollectError::UnknownApplication(_))
        ));
        assert!(sync.set("nope", true).await.is_err());
        assert!(!sync.is_enabled("nope"));
    }

    #[tokio::test]
    async fn test_refresh_picks_up_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let (control, sync) = controller(&dir).await;

        control.set("karmada-scheduler", false).await.unwrap();
        assert!(sync.is_enabled("karmada-scheduler"));

        sync.refresh().await.unwrap();
        assert!(!sync.is_enabled("karmada-scheduler"));
    }

    #[tokio::test]
    async fn test_flag_persists_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (control, sync) = controller(&dir).await;
            sync.set("karmada-scheduler", false).await.unwrap();
            control.close().await;
        }

        let (_, sync) = controller(&dir).await;
        assert!(!sync.get_status("karmada-scheduler").unwrap());
        assert!(sync.get_status("karmada-agent").unwrap());
    }

    #[tokio::test]
    async fn test_refresh_never_reverts_a_concurrent_set() {
        let dir = tempfile::tempdir().unwrap();
        let (control, sync) = controller(&dir).await;

        for i in 0..20 {
            let enabled = i % 2 == 0;
            let (set, refresh) = tokio::join!(sync.set("karmada-agent", enabled), sync.refresh());
            set.unwrap();
            refresh.unwrap();

            assert_eq!(sync.is_enabled("karmada-agent"), enabled, "iteration {}", i);
            assert_eq!(control.get("karmada-agent").await.unwrap(), Some(enabled));
        }
    }
}
