use anyhow::{Context, Result};
use colored::Colorize;
use fleet_metrics::{config, init_tracing, server};
use std::path::Path;
use tracing::info;

/// Execute the start command
///
/// Loads configuration, initializes logging from it and runs the server
/// until SIGTERM/SIGINT.
pub async fn execute(config_path: &Path) -> Result<()> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    init_tracing(&cfg.server.log_level, cfg.server.log_format == "json");

    println!("{}", "Starting fleet-metrics in foreground mode...".green());
    info!(config = %config_path.display(), "Starting fleet-metrics");

    server::start_server(cfg).await?;

    Ok(())
}
