//! Configuration management
//!
//! Sources, lowest precedence first: built-in defaults, an optional YAML
//! file, `MISSION_CONTROL_*` environment variables (`__` separates nested
//! keys, e.g. `MISSION_CONTROL_MCP__TIMEOUT=10s`), and the legacy
//! `HUBSPOT_*` variables. Command-line flags are applied on top by the
//! binary.

use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default OAuth redirect URI (the callback listener binds its port)
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8400/oauth/callback";
/// Port used when the redirect URI does not name one
pub const DEFAULT_CALLBACK_PORT: u16 = 8400;
/// Default MCP endpoint
pub const DEFAULT_MCP_URL: &str = "http://127.0.0.1:3333";

const DEFAULT_AUTHORIZE_URL: &str = "https://app.hubspot.com/oauth/authorize";
const DEFAULT_TOKEN_URL: &str = "https://api.hubapi.com/oauth/v1/token";
const DEFAULT_SCOPES: &str = "crm.objects.contacts.read crm.objects.contacts.write \
     crm.objects.companies.read crm.objects.companies.write \
     crm.objects.deals.read crm.objects.deals.write";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OAuth client configuration
    pub oauth: OAuthConfig,
    /// MCP peer configuration
    pub mcp: McpConfig,
    /// Token storage configuration
    pub storage: StorageConfig,
}

/// OAuth 2.0 client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Registered client ID
    pub client_id: String,
    /// Client secret, for providers that require one alongside PKCE
    pub client_secret: Option<String>,
    /// Redirect URI registered with the provider; port 0 picks a free port
    pub redirect_uri: String,
    /// Space-separated scopes
    pub scopes: String,
    /// Authorization endpoint
    pub authorize_url: String,
    /// Token endpoint
    pub token_url: String,
    /// How long `auth login` waits for the browser redirect
    #[serde(with = "humantime_serde")]
    pub login_timeout: Duration,
    /// Refresh tokens that expire within this window
    #[serde(with = "humantime_serde")]
    pub refresh_lookahead: Duration,
    /// Try to open the authorize URL in a browser
    pub open_browser: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: DEFAULT_SCOPES.to_string(),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            login_timeout: Duration::from_secs(5 * 60),
            refresh_lookahead: Duration::from_secs(5 * 60),
            open_browser: true,
        }
    }
}

/// How the access token reaches the MCP server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// `Authorization: Bearer <token>` on every HTTP request
    #[default]
    Header,
    /// Token kept valid but not attached; the server resolves it from its own context
    Context,
    /// No OAuth at all
    None,
}

/// MCP peer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// HTTP endpoint (used when no `command` is set)
    pub url: String,
    /// Command line of a stdio MCP server; takes precedence over `url`
    pub command: Option<String>,
    /// Extra arguments appended to `command`
    pub args: Vec<String>,
    /// Extra environment for the subprocess
    pub env: HashMap<String, String>,
    /// Token presentation
    pub auth_mode: AuthMode,
    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Send `initialize` / `notifications/initialized` before the first call
    pub handshake: bool,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_MCP_URL.to_string(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            auth_mode: AuthMode::Header,
            timeout: Duration::from_secs(30),
            handshake: true,
        }
    }
}

/// Where the token lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// OS keychain when available, file otherwise
    #[default]
    Auto,
    /// OS keychain only
    Keyring,
    /// JSON file only
    File,
}

/// Token storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selection
    pub backend: StorageBackend,
    /// Token file path (file backend); defaults to `~/.config/mission-control/token.json`
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment
            .merge(Env::prefixed("MISSION_CONTROL_").split("__"))
            .merge(
                Env::prefixed("HUBSPOT_")
                    .filter_map(|key| legacy_env_key(key.as_str()).map(Into::into)),
            );

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the settings every command relies on
    pub fn validate(&self) -> Result<()> {
        if self.mcp.auth_mode != AuthMode::None {
            if self.oauth.client_id.trim().is_empty() {
                return Err(Error::Config(
                    "HUBSPOT_CLIENT_ID is required (or set oauth.client_id)".to_string(),
                ));
            }
            for (name, value) in [
                ("oauth.redirect_uri", &self.oauth.redirect_uri),
                ("oauth.authorize_url", &self.oauth.authorize_url),
                ("oauth.token_url", &self.oauth.token_url),
            ] {
                Url::parse(value)
                    .map_err(|e| Error::Config(format!("Invalid {name} '{value}': {e}")))?;
            }
        }

        if self.mcp.command.is_none() {
            Url::parse(&self.mcp.url)
                .map_err(|e| Error::Config(format!("Invalid mcp.url '{}': {e}", self.mcp.url)))?;
        }

        Ok(())
    }
}

/// Map the legacy `HUBSPOT_*` variables onto config keys
fn legacy_env_key(key: &str) -> Option<&'static str> {
    match key.to_ascii_lowercase().as_str() {
        "client_id" => Some("oauth.client_id"),
        "client_secret" => Some("oauth.client_secret"),
        "redirect_uri" => Some("oauth.redirect_uri"),
        "scopes" => Some("oauth.scopes"),
        "mcp_url" => Some("mcp.url"),
        "mcp_auth_mode" => Some("mcp.auth_mode"),
        _ => None,
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Either `30` or `"30s"`
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    /// Serialize Duration to human-readable string (e.g., "30s")
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() > 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };
        let s = s.trim();

        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .trim()
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
