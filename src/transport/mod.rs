//! Transport implementations for the MCP peer
//!
//! A transport moves newline-framed JSON messages in both directions and
//! knows nothing about request ids; matching responses to callers is the
//! job of [`crate::correlator::RequestCorrelator`].

mod http;
mod stdio;

pub use self::http::HttpTransport;
pub use self::stdio::StdioTransport;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::Result;
use crate::config::McpConfig;

/// Inbound frames, one complete JSON message per item
///
/// The stream ends when the peer goes away; an `Err` item is terminal.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Duplex channel to the MCP peer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame (without its trailing newline)
    async fn send(&self, frame: String) -> Result<()>;

    /// Take the inbound frame stream
    ///
    /// Only one consumer may exist; a second call returns an error.
    fn receive(&self) -> Result<MessageStream>;

    /// Close the channel and release its resources
    async fn close(&self) -> Result<()>;

    /// Credential slot: bearer token attached to subsequent sends
    ///
    /// Transports without a per-request credential ignore it.
    fn set_bearer_token(&self, _token: Option<String>) {}

    /// Short transport name for logs
    fn kind(&self) -> &'static str;
}

/// Build the transport selected by the MCP configuration
///
/// A configured `command` wins over `url`: the agent then talks to a
/// subprocess over its standard streams.
pub fn connect(config: &McpConfig) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = if let Some(command) = config.command.as_deref() {
        StdioTransport::spawn(command, &config.args, &config.env)?
    } else {
        HttpTransport::new(&config.url, config.auth_mode, config.timeout)?
    };
    Ok(transport)
}
