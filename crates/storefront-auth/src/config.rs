//! Authentication settings
//!
//! Deserializable so a host can embed it as a section of its own config file;
//! every field has a default matching the storefront backend.

use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
    DEFAULT_REFRESH_TIMEOUT_SECS, LANDING_ROUTE, REFRESH_PATH, UNAUTHENTICATED_PATHS,
};

/// How the refresh credential reaches the refresh endpoint.
///
/// The backend accepts it from either its cookie or an `Authorization`
/// header, and which one wins when both are present is up to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshCredentialMode {
    /// Cookie jar only
    Cookie,
    /// `Authorization: Bearer <refresh>` only
    Header,
    /// Cookie jar plus header fallback
    #[default]
    Both,
}

impl RefreshCredentialMode {
    pub fn uses_cookies(self) -> bool {
        matches!(self, Self::Cookie | Self::Both)
    }

    pub fn sends_header(self) -> bool {
        matches!(self, Self::Header | Self::Both)
    }
}

/// Authentication settings for `Client`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Endpoints that never carry the access credential
    #[serde(default = "default_unauthenticated_paths")]
    pub unauthenticated_paths: Vec<String>,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    #[serde(default)]
    pub refresh_credential: RefreshCredentialMode,
    #[serde(default = "default_landing_route")]
    pub landing_route: String,
}

fn default_refresh_path() -> String {
    REFRESH_PATH.to_string()
}

fn default_unauthenticated_paths() -> Vec<String> {
    UNAUTHENTICATED_PATHS.iter().map(|p| p.to_string()).collect()
}

fn default_refresh_timeout() -> u64 {
    DEFAULT_REFRESH_TIMEOUT_SECS
}

fn default_landing_route() -> String {
    LANDING_ROUTE.to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_path: default_refresh_path(),
            unauthenticated_paths: default_unauthenticated_paths(),
            refresh_timeout_secs: default_refresh_timeout(),
            refresh_credential: RefreshCredentialMode::default(),
            landing_route: default_landing_route(),
        }
    }
}

impl AuthConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}
