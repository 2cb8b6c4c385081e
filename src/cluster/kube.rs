//! HTTP cluster client backed by the Kubernetes API server proxy
//!
//! Two endpoints are used: the host cluster (where the monitored control-plane
//! components run) and the control plane, whose cluster proxy reaches pods in
//! member clusters. Credentials come from kubeconfig files or, for the host,
//! from the in-cluster service account.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::{ClusterClient, ClusterError, ClusterInfo, ProxyScope};
use crate::config::ClusterConfig;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// An authenticated API server base URL
#[derive(Clone)]
pub struct Endpoint {
    client: Client,
    server: String,
    token: Option<String>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("server", &self.server)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Endpoint {
    /// Endpoint with bearer-token auth and default TLS settings
    pub fn new(server: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, ClusterError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClusterError::Credentials(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            server: server.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Endpoint for the current context of a kubeconfig file
    pub fn from_kubeconfig(path: &Path, timeout: Duration) -> Result<Self, ClusterError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClusterError::Credentials(format!("cannot read {}: {}", path.display(), e))
        })?;
        let kubeconfig: KubeConfigFile = serde_yaml::from_str(&raw).map_err(|e| {
            ClusterError::Credentials(format!("invalid kubeconfig {}: {}", path.display(), e))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        kubeconfig.into_endpoint(base_dir, timeout)
    }

    /// Endpoint for the service account mounted into the pod
    pub fn in_cluster(timeout: Duration) -> Result<Self, ClusterError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| ClusterError::Credentials("not running inside a cluster".to_string()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let server = if host.contains(':') {
            format!("https://[{}]:{}", host, port)
        } else {
            format!("https://{}:{}", host, port)
        };

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token"))
            .map_err(|e| ClusterError::Credentials(format!("cannot read service account token: {}", e)))?;
        let ca = std::fs::read(dir.join("ca.crt"))
            .map_err(|e| ClusterError::Credentials(format!("cannot read service account CA: {}", e)))?;

        let certificate = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| ClusterError::Credentials(format!("invalid service account CA: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .add_root_certificate(certificate)
            .build()
            .map_err(|e| ClusterError::Credentials(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            server,
            token: Some(token.trim().to_string()),
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, ClusterError> {
        let url = format!("{}{}", self.server, path);
        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| ClusterError::Request {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterError::Status {
                url,
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| ClusterError::Request { url, source })?;
        Ok(bytes.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClusterError> {
        let body = self.get(path, query).await?;
        serde_json::from_slice(&body).map_err(|e| ClusterError::Decode {
            url: format!("{}{}", self.server, path),
            reason: e.to_string(),
        })
    }
}

/// [`ClusterClient`] talking to real API servers
pub struct KubeClusterClient {
    host: Option<Endpoint>,
    control_plane: Option<Endpoint>,
}

impl KubeClusterClient {
    pub fn new(host: Option<Endpoint>, control_plane: Option<Endpoint>) -> Self {
        Self {
            host,
            control_plane,
        }
    }

    /// Build both endpoints from configuration
    ///
    /// Missing credentials are not fatal: the affected scope reports a
    /// credentials error on every call so the collector can keep running.
    pub fn from_config(cfg: &ClusterConfig) -> Self {
        let timeout = cfg.request_timeout();

        let host = match &cfg.host_kubeconfig {
            Some(path) => Endpoint::from_kubeconfig(path, timeout),
            None => Endpoint::in_cluster(timeout),
        };
        let host = match host {
            Ok(endpoint) => {
                info!(server = %endpoint.server(), "Host cluster endpoint configured");
                Some(endpoint)
            }
            Err(e) => {
                warn!(error = %e, "Host cluster credentials unavailable");
                None
            }
        };

        let control_plane = match cfg.karmada_kubeconfig_path() {
            Some(path) => match Endpoint::from_kubeconfig(&path, timeout) {
                Ok(endpoint) => {
                    info!(server = %endpoint.server(), "Control plane endpoint configured");
                    Some(endpoint)
                }
                Err(e) => {
                    warn!(error = %e, "Control plane credentials unavailable");
                    None
                }
            },
            None => {
                warn!("No home directory, control plane kubeconfig location unknown");
                None
            }
        };

        Self::new(host, control_plane)
    }

    fn control_plane(&self) -> Result<&Endpoint, ClusterError> {
        self.control_plane
            .as_ref()
            .ok_or_else(|| ClusterError::Credentials("control plane not configured".to_string()))
    }

    /// Endpoint and path prefix for a proxy scope
    fn route(&self, scope: &ProxyScope) -> Result<(&Endpoint, String), ClusterError> {
        match scope {
            ProxyScope::Host => {
                let endpoint = self
                    .host
                    .as_ref()
                    .ok_or_else(|| ClusterError::Credentials("host cluster not configured".to_string()))?;
                Ok((endpoint, String::new()))
            }
            ProxyScope::Member(cluster) => Ok((
                self.control_plane()?,
                format!("/apis/cluster.karmada.io/v1alpha1/clusters/{}/proxy", cluster),
            )),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ClusterError> {
        let list: ObjectList<ClusterObject> = self
            .control_plane()?
            .get_json("/apis/cluster.karmada.io/v1alpha1/clusters", &[])
            .await?;

        Ok(list
            .items
            .into_iter()
            .map(|c| ClusterInfo {
                name: c.metadata.name,
                sync_mode: c.spec.sync_mode,
            })
            .collect())
    }

    async fn list_pods(
        &self,
        scope: &ProxyScope,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let (endpoint, prefix) = self.route(scope)?;
        let path = format!("{}/api/v1/namespaces/{}/pods", prefix, namespace);
        let list: ObjectList<PodObject> = endpoint
            .get_json(&path, &[("labelSelector", label_selector)])
            .await?;

        Ok(list.items.into_iter().map(|p| p.metadata.name).collect())
    }

    async fn pod_metrics(
        &self,
        scope: &ProxyScope,
        namespace: &str,
        pod: &str,
        port: u16,
    ) -> Result<Vec<u8>, ClusterError> {
        let (endpoint, prefix) = self.route(scope)?;
        let path = format!(
            "{}/api/v1/namespaces/{}/pods/{}:{}/proxy/metrics",
            prefix, namespace, pod, port
        );
        endpoint.get(&path, &[]).await
    }
}

#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PodObject {
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct ClusterObject {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ClusterSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ClusterSpec {
    #[serde(rename = "syncMode", default)]
    sync_mode: String,
}

// Minimal kubeconfig model: only the fields needed to reach one API server

#[derive(Debug, Deserialize)]
struct KubeConfigFile {
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    server: String,
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: Option<String>,
    #[serde(rename = "certificate-authority")]
    certificate_authority: Option<PathBuf>,
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
struct UserEntry {
    token: Option<String>,
    #[serde(rename = "client-certificate-data")]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-key-data")]
    client_key_data: Option<String>,
    #[serde(rename = "client-certificate")]
    client_certificate: Option<PathBuf>,
    #[serde(rename = "client-key")]
    client_key: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

fn decode_base64(field: &str, data: &str) -> Result<Vec<u8>, ClusterError> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ClusterError::Credentials(format!("invalid {}: {}", field, e)))
}

/// Inline data wins over a file reference; relative files resolve against
/// the kubeconfig's directory
fn read_material(
    field: &str,
    data: Option<&String>,
    file: Option<&PathBuf>,
    base_dir: &Path,
) -> Result<Option<Vec<u8>>, ClusterError> {
    if let Some(data) = data {
        return decode_base64(field, data).map(Some);
    }
    match file {
        Some(file) => {
            let path = if file.is_absolute() {
                file.clone()
            } else {
                base_dir.join(file)
            };
            std::fs::read(&path)
                .map(Some)
                .map_err(|e| ClusterError::Credentials(format!("cannot read {}: {}", path.display(), e)))
        }
        None => Ok(None),
    }
}

impl KubeConfigFile {
    fn into_endpoint(self, base_dir: &Path, timeout: Duration) -> Result<Endpoint, ClusterError> {
        let context_name = self
            .current_context
            .clone()
            .or_else(|| self.contexts.first().map(|c| c.name.clone()))
            .ok_or_else(|| ClusterError::Credentials("kubeconfig has no context".to_string()))?;
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| ClusterError::Credentials(format!("context {} not found", context_name)))?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| ClusterError::Credentials(format!("cluster {} not found", context.cluster)))?;
        let user = context
            .user
            .as_ref()
            .and_then(|name| self.users.iter().find(|u| &u.name == name))
            .map(|u| &u.user);

        let mut builder = Client::builder().timeout(timeout);

        if cluster.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca) = read_material(
            "certificate-authority-data",
            cluster.certificate_authority_data.as_ref(),
            cluster.certificate_authority.as_ref(),
            base_dir,
        )? {
            let certificate = reqwest::Certificate::from_pem(&ca)
                .map_err(|e| ClusterError::Credentials(format!("invalid cluster CA: {}", e)))?;
            builder = builder.add_root_certificate(certificate);
        }

        let mut token = None;
        if let Some(user) = user {
            token = user.token.clone();

            let cert = read_material(
                "client-certificate-data",
                user.client_certificate_data.as_ref(),
                user.client_certificate.as_ref(),
                base_dir,
            )?;
            let key = read_material(
                "client-key-data",
                user.client_key_data.as_ref(),
                user.client_key.as_ref(),
                base_dir,
            )?;
            if let (Some(mut cert), Some(key)) = (cert, key) {
                cert.push(b'\n');
                cert.extend_from_slice(&key);
                let identity = reqwest::Identity::from_pem(&cert)
                    .map_err(|e| ClusterError::Credentials(format!("invalid client certificate: {}", e)))?;
                builder = builder.identity(identity);
            }
        }

        let client = builder
            .build()
            .map_err(|e| ClusterError::Credentials(format!("failed to build HTTP client: {}", e)))?;

        Ok(Endpoint {
            client,
            server: cluster.server.trim_end_matches('/').to_string(),
            token,
        })
    }
}
