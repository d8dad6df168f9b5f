//! Client configuration: backend addresses and credentials.
//!
//! Loaded from `~/.streetmeat/config.toml` (or an explicit path), then
//! overridden by `STREETMEAT_*` environment variables and CLI flags.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const ENV_API_URL: &str = "STREETMEAT_API_URL";
pub const ENV_WS_URL: &str = "STREETMEAT_WS_URL";
pub const ENV_TOKEN: &str = "STREETMEAT_TOKEN";

/// Source of the bearer token attached to REST calls.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<SecretString>;
}

/// Fixed token resolved once at startup.
#[derive(Default)]
pub struct StaticCredentials {
    token: Option<SecretString>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.map(SecretString::from),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<SecretString> {
        self.token.clone()
    }
}

/// On-disk / resolved client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// REST base, e.g. `http://localhost:8000/api`
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// WebSocket base, e.g. `ws://localhost:8000`
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Bearer token (or env var reference like ${STREETMEAT_TOKEN})
    #[serde(default)]
    pub token: Option<String>,

    /// Default pickup location for feed commands
    #[serde(default)]
    pub default_location: Option<String>,

    /// Live connection tuning
    #[serde(default)]
    pub live: LiveConfig,
}

/// Reconnect and heartbeat settings for the push connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiveConfig {
    #[serde(default = "default_max_reconnects")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_api_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8000".to_string()
}

fn default_max_reconnects() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnects(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl LiveConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            token: None,
            default_location: None,
            live: LiveConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".streetmeat")
            .join("config.toml")
    }

    /// Load from the default path; a missing file yields defaults.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: ClientConfig = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Apply `STREETMEAT_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            self.api_url = url;
        }
        if let Ok(url) = std::env::var(ENV_WS_URL) {
            self.ws_url = url;
        }
        if let Ok(token) = std::env::var(ENV_TOKEN) {
            self.token = Some(token);
        }
    }

    /// Resolve token from environment if needed
    pub fn resolve_token(&self) -> Option<String> {
        self.token.as_ref().and_then(|token| {
            if token.starts_with("${") && token.ends_with('}') {
                let env_var = &token[2..token.len() - 1];
                std::env::var(env_var).ok()
            } else {
                Some(token.clone())
            }
        })
    }

    pub fn credentials(&self) -> Arc<dyn CredentialProvider> {
        Arc::new(StaticCredentials::new(self.resolve_token()))
    }

    pub fn api_base(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn ws_base(&self) -> &str {
        self.ws_url.trim_end_matches('/')
    }
}
