//! Integration tests for the public protocol and configuration surface

use std::time::Duration;

use mission_control::config::{AuthMode, Config, StorageBackend};
use mission_control::Error;
use mission_control::protocol::{
    InitializeParams, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
    RequestId, ToolsListResult,
};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_protocol_version() {
    assert_eq!(PROTOCOL_VERSION, "2024-11-05");
    assert_eq!(InitializeParams::for_agent().protocol_version, PROTOCOL_VERSION);
}

#[test]
fn test_request_id_display() {
    assert_eq!(RequestId::Number(42).to_string(), "42");
    assert_eq!(RequestId::String("test-123".to_string()).to_string(), "test-123");
}

#[test]
fn test_json_rpc_request_serialization() {
    let request = JsonRpcRequest::new(RequestId::String("1".to_string()), "tools/list", None);

    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains("\"jsonrpc\":\"2.0\""));
    assert!(json.contains("\"method\":\"tools/list\""));
    assert!(json.contains("\"id\":\"1\""));
    assert!(!json.contains("params"));
}

#[test]
fn test_json_rpc_response_success() {
    let response: JsonRpcResponse =
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}))
            .unwrap();
    assert_eq!(response.into_result().unwrap(), json!({"tools": []}));
}

#[test]
fn test_json_rpc_response_error() {
    let response: JsonRpcResponse = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": {"code": -32600, "message": "Invalid request"}
    }))
    .unwrap();

    match response.into_result() {
        Err(Error::Protocol { code, message, .. }) => {
            assert_eq!(code, -32600);
            assert_eq!(message, "Invalid request");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[test]
fn test_inbound_message_kinds() {
    let response: JsonRpcMessage =
        serde_json::from_str(r#"{"jsonrpc":"2.0","id":"a","result":{}}"#).unwrap();
    assert!(response.method().is_none());

    let notification: JsonRpcMessage =
        serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).unwrap();
    assert_eq!(notification.method(), Some("notifications/progress"));
}

#[test]
fn test_tools_page_with_cursor() {
    let page: ToolsListResult = serde_json::from_value(json!({
        "tools": [{"name": "search_contacts", "inputSchema": {"type": "object"}}],
        "nextCursor": "page-2"
    }))
    .unwrap();

    assert_eq!(page.tools.len(), 1);
    assert_eq!(page.tools[0].name, "search_contacts");
    assert_eq!(page.next_cursor.as_deref(), Some("page-2"));
}

#[test]
fn test_config_defaults() {
    let config = Config::default();

    assert_eq!(config.oauth.redirect_uri, "http://127.0.0.1:8400/oauth/callback");
    assert_eq!(config.oauth.login_timeout, Duration::from_secs(300));
    assert_eq!(config.oauth.refresh_lookahead, Duration::from_secs(300));
    assert_eq!(config.mcp.auth_mode, AuthMode::Header);
    assert_eq!(config.mcp.timeout, Duration::from_secs(30));
    assert_eq!(config.storage.backend, StorageBackend::Auto);
}

#[test]
fn test_error_classification() {
    assert!(Error::NotAuthenticated.is_auth_error());
    assert!(Error::StateMismatch.is_auth_error());
    assert!(Error::Unreachable("connection refused".to_string()).is_unreachable());
    assert!(
        Error::Rejected {
            status: 403,
            body: String::new()
        }
        .is_rejection()
    );
    assert!(!Error::Timeout("30s".to_string()).is_rejection());
}
