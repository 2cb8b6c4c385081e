//! Edit the sync flags table directly
//!
//! A running server notices the change on its next refresh.

use anyhow::{bail, Result};
use colored::Colorize;
use fleet_metrics::collector::ALL_APPLICATIONS;
use fleet_metrics::config::{self, Config};
use fleet_metrics::store::ControlStore;
use std::path::Path;

use crate::cli::SyncCommands;

pub async fn execute(config_path: &Path, action: SyncCommands) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    let control = ControlStore::open(&cfg.collector.data_dir).await?;
    control.seed(&cfg.collector.applications).await?;

    let result = run(&cfg, &control, action).await;
    control.close().await;
    result
}

async fn run(cfg: &Config, control: &ControlStore, action: SyncCommands) -> Result<()> {
    match action {
        SyncCommands::On { application } => set(cfg, control, &application, true).await,
        SyncCommands::Off { application } => set(cfg, control, &application, false).await,
        SyncCommands::Status { application } => {
            let flags = control.load_all().await?;
            if let Some(app) = &application {
                if !flags.contains_key(app) {
                    bail!("Unknown application: {}", app);
                }
            }

            println!("{}", "Sync flags".bold().underline());
            for (app, enabled) in flags
                .iter()
                .filter(|(app, _)| application.as_ref().map_or(true, |a| a == *app))
            {
                println!("  {:<45} {}", app, render(*enabled));
            }
            Ok(())
        }
    }
}

async fn set(cfg: &Config, control: &ControlStore, application: &str, enabled: bool) -> Result<()> {
    if application == ALL_APPLICATIONS {
        let updated = control.set_all(enabled).await?;
        println!("{} {} applications", render(enabled), updated);
        return Ok(());
    }
    if !cfg.collector.applications.iter().any(|a| a == application) {
        bail!("Unknown application: {}", application);
    }

    control.set(application, enabled).await?;
    println!("{} {}", render(enabled), application);
    Ok(())
}

fn render(enabled: bool) -> colored::ColoredString {
    if enabled {
        "ON".green()
    } else {
        "OFF".red()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir) -> Config {
        let mut cfg = Config::default();
        cfg.collector.data_dir = dir.path().to_path_buf();
        cfg.collector.applications = vec!["karmada-scheduler".to_string()];
        cfg
    }

    #[tokio::test]
    async fn test_set_known_application() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let control = ControlStore::open(dir.path()).await.unwrap();
        control.seed(&cfg.collector.applications).await.unwrap();

        set(&cfg, &control, "karmada-scheduler", false).await.unwrap();
        assert_eq!(control.get("karmada-scheduler").await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_set_unknown_application_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let control = ControlStore::open(dir.path()).await.unwrap();

        assert!(set(&cfg, &control, "karmada-webhook", true).await.is_err());
        assert_eq!(control.get("karmada-webhook").await.unwrap(), None);
    }
}
