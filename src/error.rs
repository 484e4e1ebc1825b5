//! Error types for mission-control

use std::io;

use thiserror::Error;

/// Result type alias for mission-control
pub type Result<T> = std::result::Result<T, Error>;

/// mission-control errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The peer process or connection went away while calls were in flight
    #[error("The remote process/service is unreachable: transport closed ({0})")]
    TransportClosed(String),

    /// The peer could not be reached at all
    #[error("The remote process/service is unreachable: {0}")]
    Unreachable(String),

    /// Transport-level I/O failure that is neither a closure nor a rejection
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote service answered with a non-success HTTP status
    #[error("The remote service rejected the call: HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, kept for diagnostics
        body: String,
    },

    /// The remote service answered with a JSON-RPC error object
    #[error("The remote service rejected the call: JSON-RPC error {code}: {message}")]
    Protocol {
        /// Error code
        code: i32,
        /// Error message
        message: String,
        /// Optional data
        data: Option<serde_json::Value>,
    },

    /// No response arrived before the caller's deadline
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The caller canceled the request
    #[error("Request canceled: {0}")]
    Canceled(String),

    /// No stored credential
    #[error("Not authenticated - please log in again with `mission-control auth login`")]
    NotAuthenticated,

    /// The user (or authorization server) denied the authorization request
    #[error(
        "Authorization denied: {error}{} - please log in again with `mission-control auth login`",
        parenthesized(.description.as_deref())
    )]
    AuthDenied {
        /// OAuth `error` parameter
        error: String,
        /// OAuth `error_description` parameter
        description: Option<String>,
    },

    /// The callback `state` did not match the login session
    #[error("Invalid state parameter in authorization callback (possible CSRF) - please log in again with `mission-control auth login`")]
    StateMismatch,

    /// Login did not complete in time
    #[error("Login timed out waiting for the authorization callback - please log in again with `mission-control auth login`")]
    LoginTimedOut,

    /// Login was canceled
    #[error("Login canceled")]
    LoginCanceled,

    /// The callback request was malformed (e.g. no code)
    #[error("Invalid authorization callback: {0} - please log in again with `mission-control auth login`")]
    CallbackInvalid(String),

    /// Authorization code exchange failed
    #[error("Token exchange failed: {0} - please log in again with `mission-control auth login`")]
    TokenExchangeFailed(String),

    /// Refresh-token exchange failed
    #[error("Token refresh failed: {0} - please log in again with `mission-control auth login`")]
    TokenRefreshFailed(String),

    /// Token persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the user must (re-)authenticate to recover
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated
                | Self::AuthDenied { .. }
                | Self::StateMismatch
                | Self::LoginTimedOut
                | Self::LoginCanceled
                | Self::CallbackInvalid(_)
                | Self::TokenExchangeFailed(_)
                | Self::TokenRefreshFailed(_)
        )
    }

    /// Whether the remote process/service could not be reached
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::TransportClosed(_) | Self::Unreachable(_))
    }

    /// Whether the remote service received the call and refused it
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Protocol { .. })
    }
}

fn parenthesized(description: Option<&str>) -> String {
    description
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}
