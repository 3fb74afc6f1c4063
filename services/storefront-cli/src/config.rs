//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. A missing config
//! file is not an error; the client then talks to the default local backend.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use storefront_auth::{AuthConfig, DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
use tracing::info;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Storefront API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Where the session survives between runs
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
}

fn default_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_session_file() -> PathBuf {
    PathBuf::from("storefront-session.json")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_file: default_session_file(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `STOREFRONT_API_URL` overrides `api.base_url`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            info!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        };

        if let Ok(url) = std::env::var("STOREFRONT_API_URL") {
            let url = url.trim();
            if !url.is_empty() {
                config.api.base_url = url.to_owned();
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.auth.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0".into(),
            ));
        }

        if !self.auth.refresh_path.starts_with('/') {
            return Err(common::Error::Config(format!(
                "refresh_path must start with '/', got: {}",
                self.auth.refresh_path
            )));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("storefront.toml")
    }
}
