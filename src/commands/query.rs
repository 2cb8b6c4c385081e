//! Offline reads of the metric stores
//!
//! Opens the stores in the configured data directory directly; a running
//! server may be writing at the same time, which WAL mode allows.

use anyhow::{Context, Result};
use colored::Colorize;
use fleet_metrics::config;
use fleet_metrics::store::{QueryService, StoreManager};
use std::path::Path;
use std::sync::Arc;

use crate::cli::QueryCommands;

pub async fn execute(config_path: &Path, action: QueryCommands) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    let stores = Arc::new(StoreManager::new(&cfg.collector.data_dir));
    let query = QueryService::new(stores.clone());

    let result = run(&query, action).await;
    stores.close().await;
    result
}

async fn run(query: &QueryService, action: QueryCommands) -> Result<()> {
    match action {
        QueryCommands::Names { application, pod } => {
            let names = query
                .list_metric_names(&application, &pod)
                .await
                .context("Failed to list metric names")?;

            println!("{}", format!("Metrics for {}/{}", application, pod).bold().underline());
            if names.is_empty() {
                println!("{}", "  (none stored)".dimmed());
            }
            for name in names {
                println!("  {}", name);
            }
        }
        QueryCommands::Tables { application } => {
            let tables = query
                .list_tables(&application)
                .await
                .context("Failed to list tables")?;

            println!("{}", format!("Tables for {}", application).bold().underline());
            if tables.is_empty() {
                println!("{}", "  (no store)".dimmed());
            }
            for table in tables {
                println!("  {}", table);
            }
        }
        QueryCommands::Detail {
            application,
            pod,
            metric,
        } => {
            let details = query
                .get_detail(&application, &pod, &metric)
                .await
                .context("Failed to query metric detail")?;

            if details.is_empty() {
                println!("{}", format!("No data for {} on {}/{}", metric, application, pod).yellow());
                return Ok(());
            }
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
    }

    Ok(())
}
