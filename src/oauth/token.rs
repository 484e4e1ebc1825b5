//! OAuth token value

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted OAuth credentials
///
/// `expires_at` is computed once, from `expires_in`, when the token is
/// issued or refreshed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Access token
    pub access_token: String,
    /// Refresh token (may be empty if the provider issued none)
    #[serde(default)]
    pub refresh_token: String,
    /// Expiry, RFC 3339 on disk
    pub expires_at: DateTime<Utc>,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Missing means "already expired": the next call refreshes.
    #[serde(default)]
    pub expires_in: i64,
}

impl Token {
    /// Build a freshly issued token
    #[must_use]
    pub fn issued(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: expiry_after(expires_in),
        }
    }

    pub(crate) fn from_response(response: TokenResponse) -> Self {
        Self::issued(
            response.access_token,
            response.refresh_token.unwrap_or_default(),
            response.expires_in,
        )
    }

    /// Apply a refresh response; an omitted refresh token keeps the old one
    pub(crate) fn apply_refresh(&mut self, response: TokenResponse) {
        self.access_token = response.access_token;
        if let Some(rotated) = response.refresh_token.filter(|r| !r.is_empty()) {
            self.refresh_token = rotated;
        }
        self.expires_at = expiry_after(response.expires_in);
    }

    /// Whether the access token is past its expiry
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether the token expires within `window`
    #[must_use]
    pub fn expires_within(&self, window: Duration) -> bool {
        chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| Utc::now().checked_add_signed(window))
            .is_none_or(|horizon| horizon >= self.expires_at)
    }

    /// Whether the token must be refreshed before use
    #[must_use]
    pub fn needs_refresh(&self, lookahead: Duration) -> bool {
        self.is_expired() || self.expires_within(lookahead)
    }

    /// Time until expiration
    #[must_use]
    pub fn time_until_expiry(&self) -> Option<Duration> {
        (self.expires_at - Utc::now()).to_std().ok()
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn expiry_after(expires_in: i64) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now)
}

/// Shorten a credential for display
#[must_use]
pub fn redact(secret: &str) -> String {
    if secret.len() > 16 && secret.is_ascii() {
        format!("{}...{}", &secret[..8], &secret[secret.len() - 4..])
    } else {
        "***".to_string()
    }
}
