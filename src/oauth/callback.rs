//! OAuth Callback Server
//!
//! A single-use HTTP endpoint on the redirect URI that receives the
//! authorization code after the user approves access in the browser.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DEFAULT_CALLBACK_PORT;
use crate::{Error, Result};

/// How long a graceful shutdown may take before the server task is aborted
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter (for CSRF protection)
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// OAuth callback result
#[derive(Debug)]
pub struct CallbackResult {
    /// Authorization code
    pub code: String,
}

/// State shared with the callback handler
struct CallbackState {
    expected_state: String,
    tx: Option<oneshot::Sender<Result<CallbackResult>>>,
}

/// Bound callback server, alive until [`CallbackListener::shutdown`] or drop
pub struct CallbackListener {
    redirect_uri: Url,
    rx: oneshot::Receiver<Result<CallbackResult>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl CallbackListener {
    /// Bind to the redirect URI's host and port and start serving its path
    ///
    /// A URI without a port listens on 8400. Port 0 binds an ephemeral
    /// port; [`Self::redirect_uri`] then reports the URI with the real
    /// port, which is what must be sent to the authorization server.
    pub async fn bind(redirect_uri: &Url, expected_state: String) -> Result<Self> {
        let host = redirect_uri
            .host_str()
            .ok_or_else(|| Error::Config(format!("Redirect URI has no host: {redirect_uri}")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = redirect_uri.port().unwrap_or(DEFAULT_CALLBACK_PORT);

        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to bind callback server on {host}:{port}: {e}"
                ))
            })?;

        let actual_addr = listener
            .local_addr()
            .map_err(|e| Error::Internal(format!("Failed to get callback server address: {e}")))?;

        let mut effective = redirect_uri.clone();
        if redirect_uri.port() != Some(actual_addr.port()) {
            effective
                .set_port(Some(actual_addr.port()))
                .map_err(|()| Error::Config(format!("Cannot set port on {redirect_uri}")))?;
        }
        info!(url = %effective, "OAuth callback server listening");

        // Create oneshot channel for the result
        let (tx, rx) = oneshot::channel();

        let state = Arc::new(Mutex::new(CallbackState {
            expected_state,
            tx: Some(tx),
        }));

        let path = match effective.path() {
            "" => "/",
            p => p,
        };
        let app = Router::new()
            .route(path, get(handle_callback))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Callback server error");
            }
        });

        Ok(Self {
            redirect_uri: effective,
            rx,
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        })
    }

    /// Redirect URI with the port actually bound
    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Wait for the first callback request
    ///
    /// Cancel-safe: dropping the future leaves the listener usable.
    pub async fn wait(&mut self) -> Result<CallbackResult> {
        (&mut self.rx)
            .await
            .map_err(|_| Error::Internal("Callback channel closed unexpectedly".to_string()))?
    }

    /// Stop serving and release the socket
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
                // A keep-alive browser connection can hold a graceful shutdown open.
                server.abort();
                let _ = server.await;
            }
        }
        debug!(url = %self.redirect_uri, "OAuth callback server stopped");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

/// Handle the OAuth callback
async fn handle_callback(
    State(state): State<Arc<Mutex<CallbackState>>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    debug!(
        has_code = params.code.is_some(),
        error = ?params.error,
        "Received OAuth callback"
    );

    let mut state = state.lock().await;

    let Some(tx) = state.tx.take() else {
        return (
            StatusCode::BAD_REQUEST,
            "Authorization callback already received",
        )
            .into_response();
    };

    // Check for errors
    if let Some(error) = params.error {
        let description = params.error_description;
        let body = match &description {
            Some(d) => format!("Authorization failed: {error} ({d})"),
            None => format!("Authorization failed: {error}"),
        };
        let _ = tx.send(Err(Error::AuthDenied { error, description }));
        return (StatusCode::BAD_REQUEST, body).into_response();
    }

    let state_matches = params
        .state
        .as_deref()
        .is_some_and(|s| bool::from(s.as_bytes().ct_eq(state.expected_state.as_bytes())));
    if !state_matches {
        let _ = tx.send(Err(Error::StateMismatch));
        return (
            StatusCode::BAD_REQUEST,
            "Invalid state parameter - possible CSRF attack",
        )
            .into_response();
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        let _ = tx.send(Err(Error::CallbackInvalid(
            "no authorization code received".to_string(),
        )));
        return (StatusCode::BAD_REQUEST, "No authorization code received").into_response();
    };

    let _ = tx.send(Ok(CallbackResult { code }));

    Html(success_page()).into_response()
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Successful</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f5f8fa;
            color: #33475b;
        }
        .container {
            text-align: center;
            padding: 2rem;
            background: white;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0,0,0,0.1);
        }
        .checkmark {
            font-size: 4rem;
            color: #00bda5;
            margin-bottom: 1rem;
        }
        h1 { margin: 0 0 0.5rem 0; }
        p { margin: 0; opacity: 0.9; }
    </style>
</head>
<body>
    <div class="container">
        <div class="checkmark">✓</div>
        <h1>Authentication Successful!</h1>
        <p>You can close this window and return to the terminal.</p>
    </div>
    <script>setTimeout(() => window.close(), 3000);</script>
</body>
</html>"#.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn listener(expected_state: &str) -> CallbackListener {
        let uri = Url::parse("http://127.0.0.1:0/oauth/callback").unwrap();
        CallbackListener::bind(&uri, expected_state.to_string())
            .await
            .unwrap()
    }

    #[test]
    fn test_callback_params_deserialize() {
        let params: CallbackParams =
            serde_urlencoded::from_str("code=abc123&state=xyz789").unwrap();

        assert_eq!(params.code, Some("abc123".to_string()));
        assert_eq!(params.state, Some("xyz789".to_string()));
    }

    #[tokio::test]
    async fn ephemeral_port_is_reflected_in_redirect_uri() {
        let listener = listener("s").await;
        let uri = listener.redirect_uri().clone();
        assert_ne!(uri.port(), Some(0));
        assert_eq!(uri.path(), "/oauth/callback");
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn valid_callback_yields_code_and_rejects_repeats() {
        let mut listener = listener("expected").await;
        let url = format!("{}?code=abc123&state=expected", listener.redirect_uri());

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.text().await.unwrap().contains("Authentication Successful"));

        let result = listener.wait().await.unwrap();
        assert_eq!(result.code, "abc123");

        let again = reqwest::get(&url).await.unwrap();
        assert_eq!(again.status(), 400);

        listener.shutdown().await;
    }

    #[tokio::test]
    async fn state_mismatch_is_rejected() {
        let mut listener = listener("expected").await;
        let url = format!("{}?code=abc123&state=forged", listener.redirect_uri());

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), 400);
        assert!(matches!(listener.wait().await, Err(Error::StateMismatch)));
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn provider_error_is_a_denial() {
        let mut listener = listener("expected").await;
        let url = format!(
            "{}?error=access_denied&error_description=User%20declined&state=expected",
            listener.redirect_uri()
        );

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), 400);
        assert!(response.text().await.unwrap().contains("access_denied"));

        match listener.wait().await {
            Err(Error::AuthDenied { error, description }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("User declined"));
            }
            other => panic!("expected denial, got {other:?}"),
        }
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn missing_code_is_invalid() {
        let mut listener = listener("expected").await;
        let url = format!("{}?state=expected", listener.redirect_uri());

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), 400);
        assert!(matches!(listener.wait().await, Err(Error::CallbackInvalid(_))));
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_the_port() {
        let listener = listener("s").await;
        let port = listener.redirect_uri().port().unwrap();
        listener.shutdown().await;

        let rebound = std::net::TcpListener::bind(("127.0.0.1", port));
        assert!(rebound.is_ok());
    }
}
