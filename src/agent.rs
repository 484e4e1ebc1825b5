//! Agent: authenticated MCP tool calls
//!
//! Every remote call first makes sure the stored token is usable
//! (refreshing it when it is expired or about to expire), then goes out
//! through the request correlator. There is no background refresh.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{AuthMode, Config};
use crate::correlator::RequestCorrelator;
use crate::oauth::{BrowserLauncher, OAuthFlow, Token, TokenStore, open_store};
use crate::protocol::{InitializeParams, Tool, ToolsCallParams, ToolsListResult};
use crate::transport::{self, Transport};
use crate::{Error, Result};

/// Upper bound on `tools/list` pages, in case a server repeats its cursor
const MAX_TOOL_PAGES: usize = 100;

/// Snapshot of the stored credential
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    /// A token is stored
    pub authenticated: bool,
    /// Expiry of the stored token
    pub expires_at: Option<DateTime<Utc>>,
    /// The stored token is past its expiry
    pub is_expired: bool,
    /// Human-readable summary
    pub message: String,
}

impl AuthStatus {
    /// Classify a stored token against the refresh lookahead
    #[must_use]
    pub fn of(token: Option<&Token>, lookahead: Duration) -> Self {
        let Some(token) = token else {
            return Self {
                authenticated: false,
                expires_at: None,
                is_expired: false,
                message: "Not authenticated".to_string(),
            };
        };

        let is_expired = token.is_expired();
        let message = if is_expired {
            "Token expired - will be refreshed on next use"
        } else if token.expires_within(lookahead) {
            "Token expiring soon - will be refreshed on next use"
        } else {
            "Authenticated"
        };

        Self {
            authenticated: true,
            expires_at: Some(token.expires_at),
            is_expired,
            message: message.to_string(),
        }
    }
}

/// Local agent for a remote MCP server
pub struct Agent {
    config: Config,
    flow: OAuthFlow,
    correlator: RequestCorrelator,
    /// MCP `initialize` handshake, done once before the first call
    initialized: OnceCell<()>,
    /// Serializes refreshes so concurrent calls spend the refresh token once
    refresh_lock: Mutex<()>,
}

impl Agent {
    /// Build an agent from configuration: token store and transport included
    pub fn connect(config: Config) -> Result<Self> {
        let store = open_store(&config.storage)?;
        let transport = transport::connect(&config.mcp)?;
        info!(
            transport = transport.kind(),
            store = store.name(),
            auth_mode = ?config.mcp.auth_mode,
            "Agent connected"
        );
        Self::new(config, store, transport)
    }

    /// Build an agent from explicit parts
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: Config,
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let flow = OAuthFlow::new(config.oauth.clone(), store)?;
        let correlator = RequestCorrelator::new(transport, config.mcp.timeout)?;

        Ok(Self {
            config,
            flow,
            correlator,
            initialized: OnceCell::new(),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Replace the browser launcher used by [`Agent::login`]
    #[must_use]
    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.flow = self.flow.with_browser(browser);
        self
    }

    /// The OAuth flow
    #[must_use]
    pub fn flow(&self) -> &OAuthFlow {
        &self.flow
    }

    /// Run the browser login; the new token is used for subsequent calls
    pub async fn login(&self, cancel: &CancellationToken) -> Result<Token> {
        let token = self.flow.login(cancel).await?;
        self.correlator
            .transport()
            .set_bearer_token(Some(token.access_token.clone()));
        Ok(token)
    }

    /// Make sure a usable access token is stored and attached
    ///
    /// Refreshes when the token is expired or expires within the
    /// configured lookahead.
    pub async fn ensure_valid(&self) -> Result<()> {
        if self.config.mcp.auth_mode == AuthMode::None {
            return Ok(());
        }

        let store = self.flow.store();
        let lookahead = self.config.oauth.refresh_lookahead;

        let mut token = store.load()?.ok_or(Error::NotAuthenticated)?;
        if token.needs_refresh(lookahead) {
            let _refreshing = self.refresh_lock.lock().await;

            // Another caller may have refreshed while we waited.
            token = store.load()?.ok_or(Error::NotAuthenticated)?;
            if token.needs_refresh(lookahead) {
                info!(expired = token.is_expired(), "Refreshing access token");
                self.flow.refresh_token().await?;
                token = store.load()?.ok_or(Error::NotAuthenticated)?;
            }
        }

        self.correlator
            .transport()
            .set_bearer_token(Some(token.access_token));
        Ok(())
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if !self.config.mcp.handshake {
            return Ok(());
        }

        self.initialized
            .get_or_try_init(|| async {
                let params = serde_json::to_value(InitializeParams::for_agent())?;
                let result = self.correlator.call("initialize", Some(params)).await?;
                debug!(
                    server = ?result.get("serverInfo"),
                    protocol = ?result.get("protocolVersion"),
                    "MCP session initialized"
                );
                self.correlator
                    .notify("notifications/initialized", None)
                    .await?;
                Ok::<_, Error>(())
            })
            .await?;
        Ok(())
    }

    /// Call an arbitrary JSON-RPC method with a valid token
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.ensure_valid().await?;
        self.ensure_initialized().await?;
        self.correlator.call(method, params).await
    }

    /// List the server's tools, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.call("tools/list", Some(params)).await?;
            let page: ToolsListResult = if result.is_null() {
                ToolsListResult::default()
            } else {
                serde_json::from_value(result)?
            };

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_ref() != Some(&next) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        debug!(count = tools.len(), "Listed tools");
        Ok(tools)
    }

    /// Invoke one tool
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::to_value(ToolsCallParams {
            name: name.to_string(),
            arguments,
        })?;
        debug!(tool = %name, "Calling tool");
        self.call("tools/call", Some(params)).await
    }

    /// Describe the stored token without touching the network
    pub fn auth_status(&self) -> Result<AuthStatus> {
        let token = self.flow.store().load()?;
        Ok(AuthStatus::of(
            token.as_ref(),
            self.config.oauth.refresh_lookahead,
        ))
    }

    /// Forget the stored token
    pub fn logout(&self) -> Result<()> {
        self.flow.store().delete()?;
        self.correlator.transport().set_bearer_token(None);
        info!("Logged out");
        Ok(())
    }

    /// Tear down the correlator and the transport
    pub async fn close(&self) -> Result<()> {
        self.correlator.close().await
    }
}
