//! Inline provider: content lives directly in the TemplateVersion. Content
//! declared `base64` is decoded, templated against the device's name and
//! labels, then re-encoded -- callers consume the final bytes the same way
//! regardless of how the template author chose to author them.

use async_trait::async_trait;
use base64::Engine;

use crate::render::schema::ProviderConfig;
use crate::render::template;
use crate::render::{ProviderResolver, RenderContext, RenderedFile};

pub struct InlineResolver;

#[async_trait]
impl ProviderResolver for InlineResolver {
    fn discriminator(&self) -> &'static str {
        "Inline"
    }

    async fn resolve(
        &self,
        ctx: &RenderContext<'_>,
        config: &ProviderConfig,
    ) -> anyhow::Result<Vec<RenderedFile>> {
        let ProviderConfig::Inline(c) = config else {
            anyhow::bail!("InlineResolver invoked with a non-Inline config");
        };

        let content = if c.base64 {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(&c.content)
                .map_err(|e| anyhow::anyhow!("inline provider {:?}: invalid base64 content: {e}", c.name))?;
            let decoded = String::from_utf8(decoded)
                .map_err(|e| anyhow::anyhow!("inline provider {:?}: base64 content is not utf-8: {e}", c.name))?;
            let rendered = template::render(&decoded, ctx.device_name, ctx.labels);
            base64::engine::general_purpose::STANDARD.encode(rendered)
        } else {
            template::render(&c.content, ctx.device_name, ctx.labels)
        };

        Ok(vec![RenderedFile { path: c.path.clone(), content: content.into_bytes() }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::schema::InlineProviderConfig;
    use serde_json::json;

    #[tokio::test]
    async fn substitutes_label_placeholder() {
        let mut labels = serde_json::Map::new();
        labels.insert("size".to_string(), json!("big"));
        let ctx = RenderContext { device_name: "dev-1", labels: &labels, repositories: &Default::default() };
        let config = ProviderConfig::Inline(InlineProviderConfig {
            name: "motd".into(),
            path: "/etc/motd".into(),
            content: "My version is {{ .metadata.labels.size }}".into(),
            base64: false,
        });

        let files = InlineResolver.resolve(&ctx, &config).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, b"My version is big");
    }

    #[tokio::test]
    async fn round_trips_base64_content() {
        let labels = serde_json::Map::new();
        let ctx = RenderContext { device_name: "dev-1", labels: &labels, repositories: &Default::default() };
        let encoded = base64::engine::general_purpose::STANDARD.encode("host={{ device.metadata.name }}");
        let config = ProviderConfig::Inline(InlineProviderConfig {
            name: "hostfile".into(),
            path: "/etc/hostfile".into(),
            content: encoded,
            base64: true,
        });

        let files = InlineResolver.resolve(&ctx, &config).await.unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(&files[0].content).unwrap();
        assert_eq!(decoded, b"host=dev-1");
    }
}
