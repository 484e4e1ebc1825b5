//! HTTP transport implementation
//!
//! Each frame is POSTed to the MCP endpoint and the HTTP response body is
//! fed back as the next inbound frame. Request and response are paired by
//! HTTP itself; the frames still flow through the same inbound stream as
//! the stdio transport so the correlator treats both alike.
//!
//! Servers that answer with `text/event-stream` have every `data:` line
//! forwarded as its own frame.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::{Client, header};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;
use url::Url;

use super::{MessageStream, Transport};
use crate::config::AuthMode;
use crate::{Error, Result};

type FrameSender = mpsc::UnboundedSender<Result<String>>;
type FrameReceiver = mpsc::UnboundedReceiver<Result<String>>;

/// HTTP transport for MCP servers reachable over plain JSON-over-POST
pub struct HttpTransport {
    /// HTTP client
    client: Client,
    /// MCP endpoint
    url: String,
    /// How the access token is presented
    auth_mode: AuthMode,
    /// Credential slot
    bearer_token: RwLock<Option<String>>,
    /// Producer side of the inbound stream; `None` once closed
    inbound: Mutex<Option<FrameSender>>,
    /// Consumer side, until `receive` takes it
    receiver: Mutex<Option<FrameReceiver>>,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(url: &str, auth_mode: AuthMode, timeout: Duration) -> Result<Arc<Self>> {
        Url::parse(url).map_err(|e| Error::Config(format!("Invalid MCP URL '{url}': {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            client,
            url: url.to_string(),
            auth_mode,
            bearer_token: RwLock::new(None),
            inbound: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
        }))
    }

    fn headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json, text/event-stream"),
        );

        if self.auth_mode == AuthMode::Header {
            if let Some(ref token) = *self.bearer_token.read() {
                let value = header::HeaderValue::from_str(&format!("Bearer {token}")).map_err(
                    |e| Error::Internal(format!("Access token is not a valid header value: {e}")),
                )?;
                headers.insert(header::AUTHORIZATION, value);
            }
        }

        Ok(headers)
    }
}

/// Map a client-side failure onto the unreachable/timeout/other split
fn classify(e: reqwest::Error) -> Error {
    if e.is_connect() {
        Error::Unreachable(e.to_string())
    } else if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e)
    }
}

/// Pull the JSON payloads out of an SSE body
fn sse_data_lines(body: &str) -> impl Iterator<Item = &str> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, frame: String) -> Result<()> {
        let inbound = self
            .inbound
            .lock()
            .clone()
            .ok_or_else(|| Error::TransportClosed("HTTP transport is closed".to_string()))?;

        debug!(url = %self.url, frame = %frame, "MCP request");

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers()?)
            .body(frame)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let is_sse = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        let body = response.text().await.map_err(classify)?;
        debug!(url = %self.url, body = %body, "MCP response");

        let frames: Vec<String> = if is_sse {
            sse_data_lines(&body).map(str::to_string).collect()
        } else if body.trim().is_empty() {
            // 202 Accepted for notifications carries no body
            Vec::new()
        } else {
            vec![body]
        };

        for frame in frames {
            inbound
                .send(Ok(frame))
                .map_err(|_| Error::TransportClosed("inbound stream dropped".to_string()))?;
        }

        Ok(())
    }

    fn receive(&self) -> Result<MessageStream> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| Error::Internal("inbound stream already taken".to_string()))?;
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn close(&self) -> Result<()> {
        // The stream ends once in-flight sends release their sender clones.
        self.inbound.lock().take();
        Ok(())
    }

    fn set_bearer_token(&self, token: Option<String>) {
        *self.bearer_token.write() = token;
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}
