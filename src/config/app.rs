// src/config/app.rs

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Selection policy for the key pool (`pool_type` in the config file).
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolPolicy {
    /// Only `Active` keys whose quarantine has elapsed are eligible.
    #[default]
    Default,
    /// Every key that is not blacklisted is eligible; quarantine cooldowns
    /// are ignored.
    NonBlacklist,
}

/// One credential in the configured key list.
///
/// Entries may be written either as a mapping with an explicit `id`, or as a
/// bare string, in which case an id is derived from the list position.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum KeyEntrySpec {
    Full { id: String, credential: String },
    Bare(String),
}

/// A fully resolved credential entry.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub id: String,
    pub credential: SecretString,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Rotation, retry and backoff knobs for the key pool.
#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub pool_type: PoolPolicy,
    /// Consecutive transient failures before a key is quarantined.
    #[serde(default = "default_max_small_retries")]
    pub max_small_retries: u32,
    /// Consecutive severe failures before a key is blacklisted.
    #[serde(default = "default_max_big_retries")]
    pub max_big_retries: u32,
    /// Quarantine cooldown duration.
    #[serde(default = "default_small_backoff")]
    pub small_backoff_secs: u64,
    /// Upstream request timeout. Minutes, matching the original setting.
    #[serde(default = "default_request_timeout_minutes")]
    pub request_timeout_minutes: u64,
    /// Request-level small-retry budget: how many times one inbound request
    /// may be re-dispatched with a different key after a transient failure.
    /// Distinct from the per-key failure counters.
    #[serde(default = "default_max_request_retries")]
    pub max_request_retries: u32,
    /// Interval of the background quarantine-release sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_type: PoolPolicy::Default,
            max_small_retries: default_max_small_retries(),
            max_big_retries: default_max_big_retries(),
            small_backoff_secs: default_small_backoff(),
            request_timeout_minutes: default_request_timeout_minutes(),
            max_request_retries: default_max_request_retries(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl PoolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_minutes * 60)
    }

    pub fn small_backoff(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.small_backoff_secs as i64)
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Single upstream base URL all requests are forwarded to.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default)]
    pub keys: Vec<KeyEntrySpec>,
    #[serde(default)]
    pub pool: PoolConfig,
}

// Must agree with the serde field defaults, so a missing config file and an
// empty YAML document produce the same configuration.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream_url: default_upstream_url(),
            keys: Vec::new(),
            pool: PoolConfig::default(),
        }
    }
}

impl AppConfig {
    /// Resolves the configured key list into entries with concrete ids.
    ///
    /// Bare-string entries get positional ids (`key-1`, `key-2`, ...).
    /// Whitespace-only credentials are kept here and rejected by validation,
    /// so the error message can name the offending entry.
    pub fn resolved_keys(&self) -> Vec<KeyEntry> {
        self.keys
            .iter()
            .enumerate()
            .map(|(idx, spec)| match spec {
                KeyEntrySpec::Full { id, credential } => KeyEntry {
                    id: id.clone(),
                    credential: SecretString::new(credential.clone()),
                },
                KeyEntrySpec::Bare(credential) => KeyEntry {
                    id: format!("key-{}", idx + 1),
                    credential: SecretString::new(credential.clone()),
                },
            })
            .collect()
    }
}

impl KeyEntry {
    /// Short preview of the credential, safe for logs.
    pub fn credential_preview(&self) -> String {
        preview(self.credential.expose_secret())
    }
}

/// Truncates a secret for logging: `abcd...wxyz`.
///
/// Counts characters, not bytes, so multi-byte credentials cannot split a
/// code point.
pub fn preview(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        secret.to_string()
    }
}

// Default value functions

fn default_upstream_url() -> String {
    "https://api.siliconflow.cn".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_small_retries() -> u32 {
    3
}

fn default_max_big_retries() -> u32 {
    2
}

fn default_small_backoff() -> u64 {
    300
}

fn default_request_timeout_minutes() -> u64 {
    5
}

fn default_max_request_retries() -> u32 {
    2
}

fn default_sweep_interval() -> u64 {
    30
}
