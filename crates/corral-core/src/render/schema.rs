//! The polymorphic config-provider sum type shared by the validator (C5)
//! and the render pipeline (C7). Dispatch is always on the `discriminator`
//! tag -- never on structural shape.

use serde::{Deserialize, Serialize};

/// One entry in a fleet template's `spec.config` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "discriminator")]
pub enum ProviderConfig {
    Inline(InlineProviderConfig),
    Git(GitProviderConfig),
    Http(HttpProviderConfig),
    OciRegistry(OciProviderConfig),
    KubernetesSecret(KubernetesSecretProviderConfig),
}

impl ProviderConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Inline(c) => &c.name,
            Self::Git(c) => &c.name,
            Self::Http(c) => &c.name,
            Self::OciRegistry(c) => &c.name,
            Self::KubernetesSecret(c) => &c.name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Inline(c) => &c.path,
            Self::Git(c) => &c.path,
            Self::Http(c) => &c.path,
            Self::OciRegistry(c) => &c.path,
            Self::KubernetesSecret(c) => &c.mount_path,
        }
    }

    /// The name of the repository this provider references, if any. Used
    /// by the validator to resolve repository refs and by the poller to
    /// fan out re-render events.
    pub fn repository_name(&self) -> Option<&str> {
        match self {
            Self::Git(c) => Some(&c.repository),
            Self::Http(c) => Some(&c.repository),
            Self::OciRegistry(c) => Some(&c.repository),
            Self::Inline(_) | Self::KubernetesSecret(_) => None,
        }
    }

    pub fn discriminator(&self) -> &'static str {
        match self {
            Self::Inline(_) => "Inline",
            Self::Git(_) => "Git",
            Self::Http(_) => "Http",
            Self::OciRegistry(_) => "OciRegistry",
            Self::KubernetesSecret(_) => "KubernetesSecret",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineProviderConfig {
    pub name: String,
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub base64: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitProviderConfig {
    pub name: String,
    /// Where the fetched content is materialized on the device.
    pub path: String,
    pub repository: String,
    pub target_revision: String,
    /// Path of the file (or directory) to read within the cloned repo.
    pub repo_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    pub name: String,
    pub path: String,
    pub repository: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciProviderConfig {
    pub name: String,
    pub path: String,
    pub repository: String,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesSecretProviderConfig {
    pub name: String,
    /// Directory the secret's data keys are materialized under, one file
    /// per key, named for the key itself.
    pub mount_path: String,
    pub secret_name: String,
    pub secret_namespace: String,
}

/// A fleet template: metadata plus the device-spec template holding the
/// provider list. Stored as the `fleets.template` / `template_versions.template`
/// JSONB column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetTemplate {
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub spec: FleetTemplateSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetTemplateSpec {
    #[serde(default)]
    pub config: Vec<ProviderConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_on_discriminator_tag() {
        let raw = serde_json::json!({
            "discriminator": "Inline",
            "name": "motd",
            "path": "/etc/motd",
            "content": "hello",
        });
        let parsed: ProviderConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.discriminator(), "Inline");
        assert_eq!(parsed.name(), "motd");
    }

    #[test]
    fn unknown_discriminator_fails_to_parse() {
        let raw = serde_json::json!({
            "discriminator": "Ftp",
            "name": "x",
            "path": "/x",
        });
        assert!(serde_json::from_value::<ProviderConfig>(raw).is_err());
    }

    #[test]
    fn repository_name_is_none_for_inline_and_k8s_secret() {
        let inline = ProviderConfig::Inline(InlineProviderConfig {
            name: "a".into(),
            path: "/a".into(),
            content: "x".into(),
            base64: false,
        });
        assert_eq!(inline.repository_name(), None);
    }
}
