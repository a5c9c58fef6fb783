//! Per-bot configuration file.
//!
//! Lives at `<config-dir>/<bot>[-<profile>].toml`. Each configured network
//! has its own table; any other tables belong to the bot itself.
//!
//! ```toml
//! [bluesky]
//! email = "bot@example.com"
//! password = "app-password"
//!
//! [mastodon]
//! base_url = "https://mastodon.social"
//! access_token = "..."
//! ```

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default Bluesky PDS.
pub const DEFAULT_PDS: &str = "https://bsky.social";
/// Default Twitter/X API base.
pub const DEFAULT_TWITTER_API: &str = "https://api.x.com";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bluesky: Option<BlueskyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mastodon: Option<MastodonConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<TwitterConfig>,
    /// Bot-specific tables.
    #[serde(flatten)]
    pub extra: toml::Table,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlueskyConfig {
    /// Login identifier: account email or handle.
    #[serde(alias = "identifier")]
    pub email: String,
    pub password: String,
    /// PDS base URL. Default: https://bsky.social
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pds: Option<String>,
}

impl BlueskyConfig {
    pub fn pds(&self) -> &str {
        self.pds.as_deref().unwrap_or(DEFAULT_PDS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MastodonConfig {
    /// Instance URL, e.g. https://mastodon.social
    pub base_url: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TwitterConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
    /// API base URL. Default: https://api.x.com
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl TwitterConfig {
    pub fn api_base(&self) -> &str {
        self.api_base.as_deref().unwrap_or(DEFAULT_TWITTER_API)
    }
}

impl Config {
    /// Load from `path`. A missing file is an empty configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        toml::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let s = toml::to_string_pretty(self)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        }
        std::fs::write(path, s).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Deserialize a bot-specific table. `None` if the table is absent.
    pub fn section<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, toml::de::Error> {
        match self.extra.get(name) {
            Some(value) => value.clone().try_into().map(Some),
            None => Ok(None),
        }
    }
}
