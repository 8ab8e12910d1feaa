//! Configuration loading and client id resolution.
//!
//! Defaults come from the embedded config.toml. Injected values come from the
//! environment, and persisted overrides win over both.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::overrides::{OverrideStore, CLIENT_ID_KEY, TENANT_ID_KEY};

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Sentinel client id meaning "not yet configured".
pub const PLACEHOLDER_CLIENT_ID: &str = "YOUR_CLIENT_ID";

/// Tenant used when none is configured.
pub const DEFAULT_TENANT: &str = "common";

/// Azure AD login host.
pub const AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Environment variables carrying injected defaults.
pub const ENV_CLIENT_ID: &str = "MSAL_CLIENT_ID";
pub const ENV_TENANT_ID: &str = "MSAL_TENANT_ID";
const ENV_REDIRECT_URI: &str = "MSAL_REDIRECT_URI";
const ENV_CACHE_LOCATION: &str = "MSAL_CACHE_LOCATION";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Application identity, used to locate platform directories.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub qualifier: String,
    pub organization: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub client_id: String,
    pub tenant: String,
    pub redirect_uri: String,
    pub cache_location: CacheLocation,
    pub login: LoginConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Where the identity client keeps its token cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLocation {
    /// In memory for the lifetime of the process.
    #[default]
    Session,
    /// Persisted in the platform data directory.
    Local,
}

impl FromStr for CacheLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" | "sessionstorage" => Ok(Self::Session),
            "local" | "localstorage" => Ok(Self::Local),
            other => Err(format!("unknown cache location '{}'", other)),
        }
    }
}

impl fmt::Display for CacheLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::Local => f.write_str("local"),
        }
    }
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config: Config =
            toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")?;

        if let Some(redirect_uri) = non_empty(env::var(ENV_REDIRECT_URI).ok()) {
            config.auth.redirect_uri = redirect_uri;
        }

        if let Some(location) = non_empty(env::var(ENV_CACHE_LOCATION).ok()) {
            config.auth.cache_location = location
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("Invalid {}", ENV_CACHE_LOCATION))?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        Ok(config)
    }
}

/// Client and tenant ids injected by the host environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectedValues {
    pub client_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl InjectedValues {
    /// Read `MSAL_CLIENT_ID` and `MSAL_TENANT_ID`.
    pub fn from_env() -> Self {
        Self {
            client_id: non_empty(env::var(ENV_CLIENT_ID).ok()),
            tenant_id: non_empty(env::var(ENV_TENANT_ID).ok()),
        }
    }
}

/// Fully resolved identity client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfiguration {
    pub client_id: String,
    pub tenant_id: String,
    /// Origin the provider redirects back to.
    pub redirect_uri: String,
    pub cache_location: CacheLocation,
}

impl ClientConfiguration {
    /// Resolve the configuration.
    ///
    /// Priority per field: persisted override > injected value > embedded default.
    pub fn resolve(
        auth: &AuthConfig,
        injected: &InjectedValues,
        overrides: &dyn OverrideStore,
    ) -> Self {
        let client_id = first_non_empty([
            overrides.get(CLIENT_ID_KEY),
            injected.client_id.clone(),
            Some(auth.client_id.clone()),
        ])
        .unwrap_or_else(|| PLACEHOLDER_CLIENT_ID.to_string());

        let tenant_id = first_non_empty([
            overrides.get(TENANT_ID_KEY),
            injected.tenant_id.clone(),
            Some(auth.tenant.clone()),
        ])
        .unwrap_or_else(|| DEFAULT_TENANT.to_string());

        Self {
            client_id,
            tenant_id,
            redirect_uri: origin_of(&auth.redirect_uri),
            cache_location: auth.cache_location,
        }
    }

    /// True when the client id is the unconfigured sentinel.
    pub fn is_placeholder(&self) -> bool {
        self.client_id.is_empty() || self.client_id == PLACEHOLDER_CLIENT_ID
    }

    /// Authority URL for the configured tenant.
    pub fn authority(&self) -> String {
        format!("{}/{}", AUTHORITY_HOST, self.tenant_id)
    }

    /// Get the authorization URL for Azure AD.
    pub fn auth_url(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority())
    }

    /// Get the token URL for Azure AD.
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority())
    }

    /// Get the logout URL for Azure AD.
    pub fn logout_url(&self) -> String {
        format!("{}/oauth2/v2.0/logout", self.authority())
    }
}

/// Reduce a redirect URI to its origin. Unparseable input is returned as-is
/// and rejected later by client construction.
fn origin_of(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(url) if url.has_host() => url.origin().ascii_serialization(),
        _ => uri.to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates.into_iter().find_map(non_empty)
}
