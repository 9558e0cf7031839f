//! HTTP provider: fetches a file from `repository.url + file_path` over an
//! ordinary GET, attaching an optional bearer credential.

use async_trait::async_trait;

use corral_db::models::RepositoryKind;

use crate::render::schema::ProviderConfig;
use crate::render::{ProviderResolver, RenderContext, RenderedFile};

pub struct HttpResolver;

#[async_trait]
impl ProviderResolver for HttpResolver {
    fn discriminator(&self) -> &'static str {
        "Http"
    }

    async fn resolve(
        &self,
        ctx: &RenderContext<'_>,
        config: &ProviderConfig,
    ) -> anyhow::Result<Vec<RenderedFile>> {
        let ProviderConfig::Http(c) = config else {
            anyhow::bail!("HttpResolver invoked with a non-Http config");
        };

        let repo = ctx
            .repositories
            .get(&c.repository)
            .ok_or_else(|| anyhow::anyhow!("http provider {:?}: repository {:?} not resolved", c.name, c.repository))?;
        if repo.kind != RepositoryKind::Http {
            anyhow::bail!("repository {:?} is not an http repository (kind {})", c.repository, repo.kind);
        }

        let url = format!("{}{}", repo.url.trim_end_matches('/'), c.file_path);
        let client = reqwest::Client::new();
        let mut request = client.get(&url);
        if let Some(credential) = &repo.credential_ref {
            request = request.bearer_auth(credential);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("http provider {:?}: request to {url:?} failed: {e}", c.name))?
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("http provider {:?}: {url:?} returned an error status: {e}", c.name))?;

        let content = response.bytes().await?.to_vec();
        Ok(vec![RenderedFile { path: c.path.clone(), content }])
    }
}
