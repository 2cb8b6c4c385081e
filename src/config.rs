use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Applications polled when the configuration does not list any
pub const DEFAULT_APPLICATIONS: &[&str] = &[
    "karmada-scheduler",
    "karmada-controller-manager",
    "karmada-agent",
    "karmada-scheduler-estimator-member1",
    "karmada-scheduler-estimator-member2",
    "karmada-scheduler-estimator-member3",
];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub applications: Vec<String>,
    pub poll_interval_ms: u64,
    pub sync_refresh_interval_ms: u64,
    pub data_dir: PathBuf,
    /// Defaults to the number of monitored applications
    pub queue_capacity: Option<usize>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            applications: DEFAULT_APPLICATIONS.iter().map(|s| s.to_string()).collect(),
            poll_interval_ms: 1000,
            sync_refresh_interval_ms: 5000,
            data_dir: PathBuf::from("./data"),
            queue_capacity: None,
        }
    }
}

impl CollectorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sync_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.sync_refresh_interval_ms)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(self.applications.len())
            .max(1)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Control namespace the monitored components run in
    pub namespace: String,
    /// Credentials for the control plane; `~/.kube/karmada.config` when unset
    pub karmada_kubeconfig: Option<PathBuf>,
    /// Credentials for the host cluster; in-cluster service account when unset
    pub host_kubeconfig: Option<PathBuf>,
    pub request_timeout_seconds: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "karmada-system".to_string(),
            karmada_kubeconfig: None,
            host_kubeconfig: None,
            request_timeout_seconds: 10,
        }
    }
}

impl ClusterConfig {
    pub fn karmada_kubeconfig_path(&self) -> Option<PathBuf> {
        self.karmada_kubeconfig
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".kube").join("karmada.config")))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Load configuration from an optional TOML file layered with
/// `FLEET_METRICS__SECTION__KEY` environment variables
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix("FLEET_METRICS")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("collector.applications"),
        )
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.collector.applications.is_empty() {
        anyhow::bail!("At least one application must be monitored");
    }

    let mut seen = HashSet::new();
    for app in &cfg.collector.applications {
        if app.trim().is_empty() {
            anyhow::bail!("Application name cannot be empty");
        }
        if app == "all" {
            anyhow::bail!("'all' is reserved and cannot be used as an application name");
        }
        if !seen.insert(app.as_str()) {
            anyhow::bail!("Application '{}' is listed more than once", app);
        }
    }

    if cfg.collector.poll_interval_ms == 0 {
        anyhow::bail!("collector.poll_interval_ms must be greater than zero");
    }
    if cfg.collector.sync_refresh_interval_ms == 0 {
        anyhow::bail!("collector.sync_refresh_interval_ms must be greater than zero");
    }
    if cfg.collector.queue_capacity == Some(0) {
        anyhow::bail!("collector.queue_capacity must be greater than zero");
    }

    match cfg.server.log_format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("Invalid log format '{}', expected 'text' or 'json'", other),
    }

    Ok(())
}
