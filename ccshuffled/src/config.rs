//! Daemon configuration and credentials.
//!
//! `config.json` lives in the data directory; every field has a default so
//! a missing or partial file is valid. Credentials never touch the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ccshuffle::protocol::DEFAULT_ADDR;
use ccshuffle::weights::WeightConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const AUTH_TOKEN_ENV: &str = "CCSHUFFLE_AUTH_TOKEN";
pub const CCUID_ENV: &str = "CCSHUFFLE_CCUID";

/// Prefix the account token carries for HTTP; the push channel wants it bare.
const TOKEN_PREFIX: &str = "cc-auth-token ";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine data directory")]
    NoDataDir,
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub api_base: String,
    pub pubsub_url: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: "https://trpc.crowdcontrol.live".to_string(),
            pubsub_url: "wss://pubsub.crowdcontrol.live/".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub keepalive_secs: u64,
    pub reconnect_backoff_secs: u64,
    pub connect_delay_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: 120,
            reconnect_backoff_secs: 60,
            connect_delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Skip discovery and drive this game session.
    pub game_session_id: Option<String>,
    pub interact_link: Option<String>,
    /// Start a session as soon as the daemon is up.
    pub autostart: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen_addr: String,
    pub tick_period_ms: u64,
    pub stop_timeout_secs: u64,
    pub backend: BackendConfig,
    pub push: PushConfig,
    pub session: SessionConfig,
    pub weights: WeightConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_ADDR.to_string(),
            tick_period_ms: 2000,
            stop_timeout_secs: 10,
            backend: BackendConfig::default(),
            push: PushConfig::default(),
            session: SessionConfig::default(),
            weights: WeightConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let mut cfg: Self = serde_json::from_str(text)?;
        cfg.weights = cfg.weights.clamped();
        Ok(cfg)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }

    /// Seconds one tick takes off the countdown, at least 1.
    pub fn tick_secs(&self) -> u32 {
        ((self.tick_period_ms + 500) / 1000).clamp(1, u32::MAX as u64) as u32
    }

    /// How long `stop` waits for each task. Never shorter than one backend
    /// call, so an in-flight effect request can finish.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs).max(self.backend.request_timeout())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Sent verbatim as the HTTP `authorization` header.
    pub auth_token: String,
    pub ccuid: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_token", &"<redacted>")
            .field("ccuid", &self.ccuid)
            .finish()
    }
}

impl Credentials {
    pub fn new(auth_token: impl Into<String>, ccuid: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            ccuid: ccuid.into(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let read = |key: &'static str| match std::env::var(key) {
            Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
            _ => Err(ConfigError::MissingCredential(key)),
        };
        Ok(Self::new(read(AUTH_TOKEN_ENV)?, read(CCUID_ENV)?))
    }

    pub fn pubsub_token(&self) -> &str {
        self.auth_token
            .strip_prefix(TOKEN_PREFIX)
            .unwrap_or(&self.auth_token)
    }
}
