//! OAuth Authorization Code flow with PKCE
//!
//! `login` drives one browser round trip: bind the callback listener,
//! send the user to the authorize URL, wait for the redirect (or a
//! cancellation, or the deadline), then trade the code for a token.
//! `refresh_token` trades the stored refresh token for a new access token.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::callback::CallbackListener;
use super::pkce::AuthSession;
use super::storage::TokenStore;
use super::token::{Token, TokenResponse};
use crate::config::OAuthConfig;
use crate::{Error, Result};

/// Where a login attempt stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    /// No login attempted yet
    Idle,
    /// Authorize URL handed out, listener waiting
    AwaitingCallback,
    /// Code received, talking to the token endpoint
    Exchanging,
    /// Token stored
    Complete,
    /// The user or the provider refused
    Denied,
    /// Callback carried a foreign state
    StateMismatch,
    /// Deadline passed
    TimedOut,
    /// Caller canceled
    Canceled,
    /// Exchange or storage failure
    Failed,
}

impl LoginState {
    fn after(error: &Error) -> Self {
        match error {
            Error::AuthDenied { .. } => Self::Denied,
            Error::StateMismatch => Self::StateMismatch,
            Error::LoginTimedOut => Self::TimedOut,
            Error::LoginCanceled => Self::Canceled,
            _ => Self::Failed,
        }
    }
}

/// Opens the authorize URL for the user
pub trait BrowserLauncher: Send + Sync {
    /// Best effort; the URL is printed regardless
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// The system's default browser
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

/// OAuth client for the configured provider
pub struct OAuthFlow {
    /// HTTP client for token requests
    http: Client,
    config: OAuthConfig,
    store: Arc<dyn TokenStore>,
    browser: Arc<dyn BrowserLauncher>,
    state: RwLock<LoginState>,
}

impl OAuthFlow {
    /// Create a flow that persists tokens in `store`
    pub fn new(config: OAuthConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            store,
            browser: Arc::new(SystemBrowser),
            state: RwLock::new(LoginState::Idle),
        })
    }

    /// Replace the browser launcher
    #[must_use]
    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    /// Current login state
    #[must_use]
    pub fn state(&self) -> LoginState {
        *self.state.read()
    }

    /// Token store shared with the agent
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// OAuth configuration
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    fn set_state(&self, next: LoginState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(from = ?*state, to = ?next, "Login state");
            *state = next;
        }
    }

    /// Build the authorization URL for a session
    pub fn authorize_url(&self, redirect_uri: &Url, session: &AuthSession) -> Result<Url> {
        let mut auth_url = Url::parse(&self.config.authorize_url)
            .map_err(|e| Error::Config(format!("Invalid authorize URL: {e}")))?;

        {
            let mut params = auth_url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", redirect_uri.as_str());
            if !self.config.scopes.trim().is_empty() {
                params.append_pair("scope", self.config.scopes.trim());
            }
            params.append_pair("state", session.state());
            params.append_pair("code_challenge", &session.challenge());
            params.append_pair("code_challenge_method", "S256");
        }

        Ok(auth_url)
    }

    /// Run the browser login and persist the resulting token
    ///
    /// Ends with the callback listener shut down whatever the outcome.
    pub async fn login(&self, cancel: &CancellationToken) -> Result<Token> {
        self.set_state(LoginState::Idle);

        let redirect = Url::parse(&self.config.redirect_uri)
            .map_err(|e| Error::Config(format!("Invalid redirect URI: {e}")))?;
        let session = AuthSession::start(self.config.login_timeout);

        let mut listener = CallbackListener::bind(&redirect, session.state().to_string())
            .await
            .inspect_err(|_| self.set_state(LoginState::Failed))?;
        let redirect_uri = listener.redirect_uri().clone();

        let auth_url = match self.authorize_url(&redirect_uri, &session) {
            Ok(url) => url,
            Err(e) => {
                listener.shutdown().await;
                self.set_state(LoginState::Failed);
                return Err(e);
            }
        };

        self.set_state(LoginState::AwaitingCallback);
        println!("\nOpen this URL in your browser to authorize mission-control:\n\n{auth_url}\n");
        if self.config.open_browser {
            info!("Opening browser for authorization");
            if let Err(e) = self.browser.open(auth_url.as_str()) {
                warn!(error = %e, "Failed to open browser automatically");
            }
        }

        let outcome = tokio::select! {
            result = listener.wait() => result,
            () = cancel.cancelled() => Err(Error::LoginCanceled),
            () = tokio::time::sleep_until(session.deadline()) => Err(Error::LoginTimedOut),
        };
        listener.shutdown().await;

        let callback = match outcome {
            Ok(callback) => callback,
            Err(e) => {
                self.set_state(LoginState::after(&e));
                return Err(e);
            }
        };

        self.set_state(LoginState::Exchanging);
        let result = async {
            let token = self
                .exchange_code(&callback.code, redirect_uri.as_str(), session.verifier())
                .await?;
            self.store.save(&token)?;
            Ok::<_, Error>(token)
        }
        .await;

        match &result {
            Ok(token) => {
                self.set_state(LoginState::Complete);
                info!(expires_at = %token.expires_at, "Login complete");
            }
            Err(e) => self.set_state(LoginState::after(e)),
        }
        result
    }

    /// Exchange authorization code for tokens
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<Token> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = self.client_secret() {
            params.push(("client_secret", secret));
        }

        let response = self
            .token_request(&params)
            .await
            .map_err(Error::TokenExchangeFailed)?;

        Ok(Token::from_response(response))
    }

    /// Refresh the stored token and persist the result
    pub async fn refresh_token(&self) -> Result<Token> {
        let mut token = self.store.load()?.ok_or(Error::NotAuthenticated)?;
        if token.refresh_token.is_empty() {
            return Err(Error::TokenRefreshFailed(
                "no refresh token available".to_string(),
            ));
        }

        let refresh_token = token.refresh_token.clone();
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.client_secret() {
            params.push(("client_secret", secret));
        }

        let response = self
            .token_request(&params)
            .await
            .map_err(Error::TokenRefreshFailed)?;

        token.apply_refresh(response);
        self.store.save(&token)?;

        info!(expires_at = %token.expires_at, "Token refreshed successfully");
        Ok(token)
    }

    fn client_secret(&self) -> Option<&str> {
        self.config
            .client_secret
            .as_deref()
            .filter(|s| !s.is_empty())
    }

    /// POST a form to the token endpoint; failures come back as display text
    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, String> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {body}", status.as_u16()));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| format!("invalid token response: {e}"))
    }
}
