//! Agent against in-process MCP and token servers

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use mission_control::config::{AuthMode, Config};
use mission_control::oauth::{MemoryTokenStore, Token, TokenStore};
use mission_control::{Agent, Error, transport};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// ============================================================================
// MCP server
// ============================================================================

#[derive(Default)]
struct McpServer {
    methods: Mutex<Vec<String>>,
    authorization: Mutex<Vec<Option<String>>>,
    reject_with: Option<StatusCode>,
}

async fn mcp(
    State(server): State<Arc<McpServer>>,
    headers: HeaderMap,
    Json(message): Json<Value>,
) -> Response {
    let method = message["method"].as_str().unwrap_or_default().to_string();
    server.methods.lock().push(method.clone());
    server.authorization.lock().push(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    if let Some(status) = server.reject_with {
        return (status, "invalid credentials").into_response();
    }

    let Some(id) = message.get("id").cloned() else {
        return StatusCode::ACCEPTED.into_response();
    };

    let body = match method.as_str() {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "test-mcp", "version": "1.0.0"}
            }
        }),
        "tools/list" => json!({"jsonrpc": "2.0", "id": id, "result": {"tools": []}}),
        "tools/call" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "content": [{"type": "text", "text": message["params"]["arguments"].to_string()}],
                "tool": message["params"]["name"]
            }
        }),
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "Method not found"}
        }),
    };
    Json(body).into_response()
}

async fn start_mcp(server: McpServer) -> (Arc<McpServer>, String) {
    let server = Arc::new(server);
    let app = Router::new()
        .route("/mcp", post(mcp))
        .with_state(Arc::clone(&server));
    let addr = serve(app).await;
    (server, format!("http://{addr}/mcp"))
}

// ============================================================================
// Token endpoint
// ============================================================================

#[derive(Default)]
struct TokenEndpoint {
    hits: AtomicUsize,
}

async fn token(
    State(endpoint): State<Arc<TokenEndpoint>>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    endpoint.hits.fetch_add(1, Ordering::SeqCst);
    assert_eq!(form["grant_type"], "refresh_token");
    Json(json!({"access_token": "AT-refreshed", "expires_in": 3600}))
}

async fn start_token_endpoint() -> (Arc<TokenEndpoint>, String) {
    let endpoint = Arc::new(TokenEndpoint::default());
    let app = Router::new()
        .route("/token", post(token))
        .with_state(Arc::clone(&endpoint));
    let addr = serve(app).await;
    (endpoint, format!("http://{addr}/token"))
}

fn config(mcp_url: &str, token_url: &str) -> Config {
    let mut config = Config::default();
    config.oauth.client_id = "client-123".to_string();
    config.oauth.token_url = token_url.to_string();
    config.mcp.url = mcp_url.to_string();
    config.mcp.timeout = Duration::from_secs(5);
    config
}

fn agent(config: Config, token: Option<Token>) -> (Agent, Arc<MemoryTokenStore>) {
    let store = Arc::new(match token {
        Some(token) => MemoryTokenStore::with_token(token),
        None => MemoryTokenStore::new(),
    });
    let transport = transport::connect(&config.mcp).unwrap();
    let agent = Agent::new(config, store.clone(), transport).unwrap();
    (agent, store)
}

fn valid_token() -> Token {
    Token::issued("AT-valid".into(), "RT1".into(), 3600)
}

// ============================================================================
// Tool calls
// ============================================================================

#[tokio::test]
async fn list_tools_handshakes_once_and_sends_bearer() {
    let (server, url) = start_mcp(McpServer::default()).await;
    let (agent, _) = agent(config(&url, "http://127.0.0.1:9/token"), Some(valid_token()));

    let tools = agent.list_tools().await.unwrap();
    assert!(tools.is_empty());
    agent.list_tools().await.unwrap();

    assert_eq!(
        *server.methods.lock(),
        vec![
            "initialize",
            "notifications/initialized",
            "tools/list",
            "tools/list"
        ]
    );
    assert!(
        server
            .authorization
            .lock()
            .iter()
            .all(|h| h.as_deref() == Some("Bearer AT-valid"))
    );
    agent.close().await.unwrap();
}

#[tokio::test]
async fn call_tool_returns_the_result() {
    let (_server, url) = start_mcp(McpServer::default()).await;
    let (agent, _) = agent(config(&url, "http://127.0.0.1:9/token"), Some(valid_token()));

    let result = agent
        .call_tool("search_contacts", json!({"query": "acme"}))
        .await
        .unwrap();
    assert_eq!(result["tool"], "search_contacts");
    assert_eq!(result["content"][0]["text"], r#"{"query":"acme"}"#);
}

#[tokio::test]
async fn unknown_method_is_a_protocol_error() {
    let (_server, url) = start_mcp(McpServer::default()).await;
    let (agent, _) = agent(config(&url, "http://127.0.0.1:9/token"), Some(valid_token()));

    let err = agent.call("no/such/method", None).await.unwrap_err();
    match &err {
        Error::Protocol { code, .. } => assert_eq!(*code, -32601),
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert!(err.is_rejection());
}

#[tokio::test]
async fn context_mode_keeps_token_out_of_requests() {
    let (server, url) = start_mcp(McpServer::default()).await;
    let mut config = config(&url, "http://127.0.0.1:9/token");
    config.mcp.auth_mode = AuthMode::Context;
    let (agent, _) = agent(config, Some(valid_token()));

    agent.list_tools().await.unwrap();
    assert!(server.authorization.lock().iter().all(Option::is_none));
}

#[tokio::test]
async fn missing_token_fails_before_any_request() {
    let (server, url) = start_mcp(McpServer::default()).await;
    let (agent, _) = agent(config(&url, "http://127.0.0.1:9/token"), None);

    let err = agent.list_tools().await.unwrap_err();
    assert!(matches!(err, Error::NotAuthenticated));
    assert!(server.methods.lock().is_empty());
}

#[tokio::test]
async fn http_rejection_is_reported_with_status() {
    let (_server, url) = start_mcp(McpServer {
        reject_with: Some(StatusCode::UNAUTHORIZED),
        ..McpServer::default()
    })
    .await;
    let (agent, _) = agent(config(&url, "http://127.0.0.1:9/token"), Some(valid_token()));

    let err = agent.list_tools().await.unwrap_err();
    match &err {
        Error::Rejected { status, body } => {
            assert_eq!(*status, 401);
            assert_eq!(body, "invalid credentials");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(err.to_string().contains("rejected the call"));
}

#[tokio::test]
async fn unreachable_server_is_reported_as_unreachable() {
    // Bind and drop to get a port nobody listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let url = format!("http://127.0.0.1:{port}/mcp");
    let (agent, _) = agent(config(&url, "http://127.0.0.1:9/token"), Some(valid_token()));

    let err = agent.list_tools().await.unwrap_err();
    assert!(err.is_unreachable(), "{err}");
    assert!(err.to_string().contains("unreachable"));
}

// ============================================================================
// Token lifecycle
// ============================================================================

#[tokio::test]
async fn ensure_valid_refreshes_a_token_one_minute_from_expiry() {
    let (server, url) = start_mcp(McpServer::default()).await;
    let (endpoint, token_url) = start_token_endpoint().await;
    let (agent, store) = agent(
        config(&url, &token_url),
        Some(Token::issued("AT-old".into(), "RT1".into(), 60)),
    );

    agent.ensure_valid().await.unwrap();
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 1);

    let stored = store.load().unwrap().unwrap();
    assert_eq!(stored.access_token, "AT-refreshed");
    assert_eq!(stored.refresh_token, "RT1");

    agent.list_tools().await.unwrap();
    assert_eq!(
        server.authorization.lock().last().cloned().flatten().as_deref(),
        Some("Bearer AT-refreshed")
    );
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ensure_valid_leaves_a_one_hour_token_alone() {
    let (_server, url) = start_mcp(McpServer::default()).await;
    let (endpoint, token_url) = start_token_endpoint().await;
    let (agent, store) = agent(config(&url, &token_url), Some(valid_token()));

    agent.ensure_valid().await.unwrap();
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 0);
    assert_eq!(store.load().unwrap().unwrap().access_token, "AT-valid");
}

#[tokio::test]
async fn concurrent_calls_share_one_refresh() {
    let (_server, url) = start_mcp(McpServer::default()).await;
    let (endpoint, token_url) = start_token_endpoint().await;
    let (agent, _) = agent(
        config(&url, &token_url),
        Some(Token::issued("AT-old".into(), "RT1".into(), -5)),
    );
    let agent = Arc::new(agent);

    let mut calls = Vec::new();
    for _ in 0..8 {
        let agent = Arc::clone(&agent);
        calls.push(tokio::spawn(async move { agent.ensure_valid().await }));
    }
    for call in calls {
        call.await.unwrap().unwrap();
    }
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Stdio transport
// ============================================================================

/// `sed` answers each request line with an empty tool list under the same id
#[cfg(target_os = "linux")]
#[tokio::test]
async fn stdio_server_round_trip() {
    let mut config = Config::default();
    config.mcp.command = Some(r#"sed -u 's/"method".*$/"result":{"tools":[]}}/'"#.to_string());
    config.mcp.auth_mode = AuthMode::None;
    config.mcp.handshake = false;
    config.mcp.timeout = Duration::from_secs(5);
    let (agent, _) = agent(config, None);

    let tools = agent.list_tools().await.unwrap();
    assert!(tools.is_empty());

    let (first, second) = tokio::join!(agent.list_tools(), agent.list_tools());
    assert!(first.unwrap().is_empty());
    assert!(second.unwrap().is_empty());

    agent.close().await.unwrap();
}

/// The server sleeps before reading, so a large frame fills the pipe and
/// its call times out mid-write.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn timed_out_stdio_write_leaves_channel_usable() {
    use mission_control::correlator::RequestCorrelator;
    use mission_control::transport::StdioTransport;

    let script = r#"sleep 1; exec sed -u 's/"method".*$/"result":{"tools":[]}}/'"#;
    let transport =
        StdioTransport::spawn("sh", &["-c".to_string(), script.to_string()], &HashMap::new())
            .unwrap();
    let correlator = RequestCorrelator::new(transport, Duration::from_secs(5)).unwrap();

    let blob = "x".repeat(1024 * 1024);
    let err = correlator
        .call_with_timeout("big", Some(json!({"blob": blob})), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "{err}");

    let result = correlator
        .call_with_timeout("tools/list", None, Duration::from_secs(4))
        .await
        .unwrap();
    assert_eq!(result, json!({"tools": []}));

    correlator.close().await.unwrap();
}

#[tokio::test]
async fn missing_stdio_command_is_unreachable() {
    let mut config = Config::default();
    config.mcp.command = Some("definitely-not-an-mcp-server-binary --stdio".to_string());

    let err = transport::connect(&config.mcp).err().unwrap();
    assert!(err.is_unreachable(), "{err}");
}
