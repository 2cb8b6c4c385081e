use anyhow::Result;
use colored::Colorize;
use fleet_metrics::config::{self, Config};
use std::path::Path;

/// Execute the config show command
///
/// Displays the effective configuration (file plus environment overrides)
pub fn show(path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());

    let cfg = config::load_config(path)?;

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&cfg)?;
    println!("{}", toml_string);

    Ok(())
}

/// Execute the config validate command
pub fn validate(path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());

    let cfg = config::load_config(path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    print_summary(&cfg);

    Ok(())
}

fn print_summary(cfg: &Config) {
    println!("{}", "Summary:".bold());
    println!("  Listen: {}:{}", cfg.server.host, cfg.server.port);
    println!("  Applications: {}", cfg.collector.applications.join(", "));
    println!("  Poll interval: {}ms", cfg.collector.poll_interval_ms);
    println!("  Data directory: {}", cfg.collector.data_dir.display());
    println!("  Namespace: {}", cfg.cluster.namespace);
    match cfg.cluster.karmada_kubeconfig_path() {
        Some(path) => println!("  Control plane kubeconfig: {}", path.display()),
        None => println!("  Control plane kubeconfig: {}", "unknown".red()),
    }
    match &cfg.cluster.host_kubeconfig {
        Some(path) => println!("  Host kubeconfig: {}", path.display()),
        None => println!("  Host kubeconfig: in-cluster service account"),
    }
}
