//! Ambient configuration types: the secret-redacting [`SecureString`], and
//! the typed sections resolved from the CLI config file (queue backoff
//! tuning, service limits, the KV store connection).

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A string that must never leak into logs, `Debug` output, or serialized
/// config dumps, while remaining usable by the code that actually needs it
/// (`expose_secret`). Built on [`secrecy::SecretString`]; unlike a plain
/// `SecretString`, this type's `Serialize` impl is one-way -- it always
/// writes the literal `"[REDACTED]"` rather than the real value, so a
/// config containing secrets can be dumped for debugging without leaking.
#[derive(Clone)]
pub struct SecureString(SecretString);

const REDACTED: &str = "[REDACTED]";

impl SecureString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for SecureString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for SecureString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SecureString::new(raw))
    }
}

impl FromStr for SecureString {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SecureString::new(s))
    }
}

impl Default for SecureString {
    fn default() -> Self {
        SecureString::new("")
    }
}

/// Retry/backoff tuning for the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    pub base_delay_ms: u64,
    pub max_retries: u32,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    pub pending_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 250,
            max_retries: 8,
            max_delay_ms: 60_000,
            jitter_factor: 0.2,
            pending_timeout_secs: 30,
        }
    }
}

/// Service-wide limits and trust boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub rendered_wait_timeout_secs: u64,
    pub trusted_proxies: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            rendered_wait_timeout_secs: 120,
            trusted_proxies: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Parse and validate `trusted_proxies` as IP addresses or CIDR blocks.
    ///
    /// Collects every malformed entry before returning, joining them into a
    /// single error, rather than failing on the first bad entry -- an
    /// operator fixing a config file wants the whole list of problems at
    /// once.
    pub fn validated_trusted_proxies(&self) -> anyhow::Result<Vec<IpAddr>> {
        let mut parsed = Vec::with_capacity(self.trusted_proxies.len());
        let mut errors = Vec::new();

        for entry in &self.trusted_proxies {
            match entry.parse::<IpAddr>() {
                Ok(ip) => parsed.push(ip),
                Err(e) => errors.push(format!("{entry:?}: {e}")),
            }
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "invalid entries in service.trustedProxies: {}",
                errors.join("; ")
            );
        }

        Ok(parsed)
    }
}

/// Connection settings for the key/value store backing the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub password: SecureString,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 6379,
            password: SecureString::default(),
        }
    }
}
