//! Kubernetes secret provider: fetches a `Secret`'s data from the API server
//! using in-cluster service-account conventions, rather than pulling in a
//! full client crate for a single GET.

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;

use crate::render::schema::ProviderConfig;
use crate::render::{ProviderResolver, RenderContext, RenderedFile};

const SERVICE_HOSTENV: &str = "KUBERNETES_SERVICE_HOST";
const SERVICE_PORTENV: &str = "KUBERNETES_SERVICE_PORT";
const SERVICE_TOKENFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_CERTFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Abstraction over "fetch a secret's data by namespace/name", so the
/// resolver can be tested without a live API server.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> anyhow::Result<serde_json::Map<String, Value>>;
}

struct InClusterSecretStore {
    client: reqwest::Client,
    api_server: String,
    token: String,
}

impl InClusterSecretStore {
    fn load() -> anyhow::Result<Self> {
        let host = std::env::var(SERVICE_HOSTENV)
            .map_err(|_| anyhow::anyhow!("{SERVICE_HOSTENV} is not set; not running in-cluster"))?;
        let port = std::env::var(SERVICE_PORTENV)
            .map_err(|_| anyhow::anyhow!("{SERVICE_PORTENV} is not set; not running in-cluster"))?;
        let token = std::fs::read_to_string(SERVICE_TOKENFILE)
            .map_err(|e| anyhow::anyhow!("failed to read service account token: {e}"))?;
        let ca_bundle = std::fs::read(SERVICE_CERTFILE)
            .map_err(|e| anyhow::anyhow!("failed to read service account ca bundle: {e}"))?;

        let client = reqwest::Client::builder()
            .add_root_certificate(reqwest::Certificate::from_pem(&ca_bundle)?)
            .build()?;

        Ok(Self { client, api_server: format!("https://{host}:{port}"), token })
    }
}

#[async_trait]
impl SecretStore for InClusterSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> anyhow::Result<serde_json::Map<String, Value>> {
        let url = format!("{}/api/v1/namespaces/{namespace}/secrets/{name}", self.api_server);
        let body: Value = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.get("data")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("secret {namespace}/{name} response has no data field"))
    }
}

#[derive(Default)]
pub struct KubernetesSecretResolver {
    store: std::sync::OnceLock<Option<std::sync::Arc<dyn SecretStore>>>,
}

impl KubernetesSecretResolver {
    #[cfg(test)]
    fn with_store(store: std::sync::Arc<dyn SecretStore>) -> Self {
        let cell = std::sync::OnceLock::new();
        cell.set(Some(store)).ok();
        Self { store: cell }
    }

    fn store(&self) -> anyhow::Result<&std::sync::Arc<dyn SecretStore>> {
        self.store
            .get_or_init(|| InClusterSecretStore::load().ok().map(|s| std::sync::Arc::new(s) as std::sync::Arc<dyn SecretStore>))
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("kubernetes secret provider: no in-cluster service account available"))
    }
}

#[async_trait]
impl ProviderResolver for KubernetesSecretResolver {
    fn discriminator(&self) -> &'static str {
        "KubernetesSecret"
    }

    async fn resolve(
        &self,
        _ctx: &RenderContext<'_>,
        config: &ProviderConfig,
    ) -> anyhow::Result<Vec<RenderedFile>> {
        let ProviderConfig::KubernetesSecret(c) = config else {
            anyhow::bail!("KubernetesSecretResolver invoked with a non-KubernetesSecret config");
        };

        let data = self.store()?.get(&c.secret_namespace, &c.secret_name).await?;
        if data.is_empty() {
            anyhow::bail!("secret {}/{} has no data keys", c.secret_namespace, c.secret_name);
        }

        let mount_path = std::path::Path::new(&c.mount_path);
        let mut files = Vec::with_capacity(data.len());
        for (key, value) in &data {
            let encoded = value.as_str().ok_or_else(|| {
                anyhow::anyhow!("secret {}/{} data value {key:?} is not a string", c.secret_namespace, c.secret_name)
            })?;
            let content = base64::engine::general_purpose::STANDARD.decode(encoded).map_err(|e| {
                anyhow::anyhow!("secret {}/{} data value {key:?} is not valid base64: {e}", c.secret_namespace, c.secret_name)
            })?;
            let path = mount_path.join(key).to_string_lossy().into_owned();
            files.push(RenderedFile { path, content });
        }

        Ok(files)
    }
}
