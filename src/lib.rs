//! mission-control library
//!
//! Local agent that calls tools on a remote Model Context Protocol (MCP)
//! server after a browser-driven OAuth 2.0 login.
//!
//! # Features
//!
//! - **OAuth 2.0 + PKCE**: Authorization Code flow with a one-shot local callback server
//! - **Token lifecycle**: Proactive refresh before every call, keychain or file persistence
//! - **Request correlation**: Many concurrent JSON-RPC calls over one duplex channel
//! - **Multi-Transport**: stdio subprocess or HTTP (JSON or SSE responses)
//!
//! # Protocol Version
//!
//! Speaks MCP protocol version 2024-11-05.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod cli;
pub mod config;
pub mod correlator;
pub mod error;
pub mod oauth;
pub mod protocol;
pub mod transport;

pub use agent::{Agent, AuthStatus};
pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. Output goes to stderr so
/// command results on stdout stay machine-readable.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install log subscriber: {e}")))
}
