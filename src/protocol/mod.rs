//! JSON-RPC envelope and the MCP message types the agent speaks

mod messages;
mod types;

pub use messages::*;
pub use types::*;

/// MCP protocol version sent in the `initialize` handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version string carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";
