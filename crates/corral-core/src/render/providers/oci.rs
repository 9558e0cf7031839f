//! OCI registry provider: implements just enough of the OCI Distribution v2
//! auth handshake to pull a blob -- `GET /v2/` probes for a `401`, the
//! `Www-Authenticate` challenge names a token endpoint, and the retried
//! request carries the bearer token it returns.

use async_trait::async_trait;
use serde_json::Value;

use corral_db::models::RepositoryKind;

use crate::render::schema::ProviderConfig;
use crate::render::{ProviderResolver, RenderContext, RenderedFile};

pub struct OciRegistryResolver;

/// The parsed `Www-Authenticate: Bearer ...` challenge from a registry's
/// `401`. Shared with the repository poller's OCI accessibility probe so
/// both sides of the auth handshake live in one place.
pub(crate) struct Challenge {
    pub(crate) realm: String,
    pub(crate) service: Option<String>,
    pub(crate) scope: Option<String>,
}

pub(crate) fn parse_www_authenticate(header: &str) -> Option<Challenge> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for part in rest.split(',') {
        let part = part.trim();
        let (key, value) = part.split_once('=')?;
        let value = value.trim_matches('"');
        match key {
            "realm" => realm = Some(value.to_string()),
            "service" => service = Some(value.to_string()),
            "scope" => scope = Some(value.to_string()),
            _ => {}
        }
    }
    Some(Challenge { realm: realm?, service, scope })
}

pub(crate) async fn fetch_token(
    client: &reqwest::Client,
    challenge: &Challenge,
    credential: Option<&str>,
) -> anyhow::Result<String> {
    let mut request = client.get(&challenge.realm);
    if let Some(service) = &challenge.service {
        request = request.query(&[("service", service.as_str())]);
    }
    if let Some(scope) = &challenge.scope {
        request = request.query(&[("scope", scope.as_str())]);
    }
    if let Some(credential) = credential {
        request = request.basic_auth("", Some(credential));
    }

    let body: Value = request.send().await?.error_for_status()?.json().await?;
    body.get("token")
        .or_else(|| body.get("access_token"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("token endpoint {:?} returned neither token nor access_token", challenge.realm))
}

/// `GET /v2/` on a registry base URL and complete the auth handshake if
/// challenged. Used by the repository poller to check accessibility
/// without needing a specific image reference to pull.
pub(crate) async fn probe_v2(client: &reqwest::Client, base_url: &str, credential: Option<&str>) -> anyhow::Result<()> {
    let url = format!("{}/v2/", base_url.trim_end_matches('/'));
    let response = client.get(&url).send().await?;

    if response.status().as_u16() != 401 {
        response.error_for_status()?;
        return Ok(());
    }

    let challenge = response
        .headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_www_authenticate)
        .ok_or_else(|| anyhow::anyhow!("registry {base_url:?} returned 401 without a parseable Www-Authenticate"))?;
    let token = fetch_token(client, &challenge, credential).await?;

    client.get(&url).bearer_auth(token).send().await?.error_for_status()?;
    Ok(())
}

#[async_trait]
impl ProviderResolver for OciRegistryResolver {
    fn discriminator(&self) -> &'static str {
        "OciRegistry"
    }

    async fn resolve(
        &self,
        ctx: &RenderContext<'_>,
        config: &ProviderConfig,
    ) -> anyhow::Result<Vec<RenderedFile>> {
        let ProviderConfig::OciRegistry(c) = config else {
            anyhow::bail!("OciRegistryResolver invoked with a non-OciRegistry config");
        };

        let repo = ctx
            .repositories
            .get(&c.repository)
            .ok_or_else(|| anyhow::anyhow!("oci provider {:?}: repository {:?} not resolved", c.name, c.repository))?;
        if repo.kind != RepositoryKind::OciRegistry {
            anyhow::bail!("repository {:?} is not an oci repository (kind {})", c.repository, repo.kind);
        }

        let (name, reference) = c.image.rsplit_once(':').unwrap_or((c.image.as_str(), "latest"));
        let manifest_url = format!("{}/v2/{name}/manifests/{reference}", repo.url.trim_end_matches('/'));

        let client = reqwest::Client::new();
        let probe = client.get(&manifest_url).send().await?;

        let token = if probe.status().as_u16() == 401 {
            let challenge = probe
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_www_authenticate)
                .ok_or_else(|| anyhow::anyhow!("oci registry {:?} returned 401 without a parseable Www-Authenticate", repo.url))?;
            Some(fetch_token(&client, &challenge, repo.credential_ref.as_deref()).await?)
        } else {
            probe.error_for_status_ref()?;
            None
        };

        let mut request = client.get(&manifest_url);
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        let content = request.send().await?.error_for_status()?.bytes().await?.to_vec();

        Ok(vec![RenderedFile { path: c.path.clone(), content }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_challenge() {
        let header = r#"Bearer realm="https://auth.example/token",service="registry.example",scope="repository:app:pull""#;
        let challenge = parse_www_authenticate(header).unwrap();
        assert_eq!(challenge.realm, "https://auth.example/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.example"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:app:pull"));
    }

    #[test]
    fn rejects_non_bearer_challenge() {
        assert!(parse_www_authenticate(r#"Basic realm="x""#).is_none());
    }
}
