//! End-to-end checks of the local gateway against a mock upstream

mod support;

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use ollama_bridge::{
    UpstreamTarget,
    proxy::ProxyForwarder,
    server::{AppState, router},
};
use ollama_bridge_common::{Session, issue_secret_token};
use serde_json::{Value, json};
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::Notify};
use tokio_tungstenite::tungstenite::{Message as WsMessage, client::IntoClientRequest};

#[derive(Clone, Default)]
struct Upstream {
    hits: Arc<AtomicUsize>,
    gate: Arc<Notify>,
}

async fn echo(State(upstream): State<Upstream>, headers: HeaderMap, request: Request) -> Json<Value> {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "path": request.uri().path(),
        "query": request.uri().query(),
        "host": header("host"),
        "origin": header("origin"),
        "user_agent": header("user-agent"),
        "auth_token": header("x-auth-token"),
    }))
}

async fn tags(State(upstream): State<Upstream>) -> Json<Value> {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "models": [{ "name": "llama3:8b" }] }))
}

async fn generate(State(upstream): State<Upstream>, body: Bytes) -> Response {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let first = format!("{{\"model\":{},\"response\":\"Hel\"}}\n", request["model"]);
    let gate = upstream.gate.clone();

    let chunks = futures_util::stream::unfold(0u8, move |step| {
        let gate = gate.clone();
        let first = first.clone();
        async move {
            match step {
                0 => Some((Ok::<_, Infallible>(Bytes::from(first)), 1)),
                1 => {
                    gate.notified().await;
                    Some((Ok(Bytes::from_static(b"{\"response\":\"lo\",\"done\":true}\n")), 2))
                }
                _ => None,
            }
        }
    });

    (
        [(CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(chunks),
    )
        .into_response()
}

async fn spawn_upstream() -> (SocketAddr, Upstream) {
    let upstream = Upstream::default();
    let app = Router::new()
        .route("/tags", get(tags))
        .route("/echo", get(echo))
        .route("/generate", post(generate))
        .with_state(upstream.clone());
    (support::serve(app).await, upstream)
}

/// Start a gateway in front of `upstream_base`; returns its address and secret
async fn spawn_bridge(upstream_base: &str) -> (SocketAddr, String) {
    let secret = issue_secret_token();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let session = Arc::new(Session::new(
        secret.clone(),
        addr.port(),
        "https://quiet-fox-42.loca.lt".to_string(),
    ));
    let forwarder = ProxyForwarder::new(UpstreamTarget::parse(upstream_base).unwrap()).unwrap();
    let app = router(AppState { session, forwarder });
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    (addr, secret)
}

#[tokio::test]
async fn test_requests_without_valid_token_never_reach_upstream() {
    let (upstream_addr, upstream) = spawn_upstream().await;
    let (bridge, _secret) = spawn_bridge(&format!("http://localhost:{}", upstream_addr.port())).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/api/tags", bridge))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "error": "Unauthorized", "receivedToken": "missing", "tokenMatch": false })
    );

    let response = client
        .get(format!("http://{}/api/tags", bridge))
        .header("x-auth-token", "not-the-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["receivedToken"], "present");

    assert_eq!(upstream.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_authorized_request_is_proxied() {
    let (upstream_addr, upstream) = spawn_upstream().await;
    let (bridge, secret) = spawn_bridge(&format!("http://localhost:{}", upstream_addr.port())).await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/api/tags", bridge))
        .header("x-auth-token", &secret)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["models"][0]["name"], "llama3:8b");
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_upstream_sees_local_identity_and_no_token() {
    let (upstream_addr, _upstream) = spawn_upstream().await;
    let port = upstream_addr.port();
    let (bridge, secret) = spawn_bridge(&format!("http://localhost:{}", port)).await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/api/echo?verbose=true", bridge))
        .header("x-auth-token", &secret)
        .header("origin", "https://chat.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen: Value = response.json().await.unwrap();
    assert_eq!(seen["path"], "/echo");
    assert_eq!(seen["query"], "verbose=true");
    assert_eq!(seen["host"], format!("127.0.0.1:{}", port));
    assert_eq!(seen["origin"], format!("http://127.0.0.1:{}", port));
    assert_eq!(seen["user_agent"], "ollama-bridge");
    assert_eq!(seen["auth_token"], Value::Null);
}

#[tokio::test]
async fn test_generation_streams_through() {
    let (upstream_addr, upstream) = spawn_upstream().await;
    let (bridge, secret) = spawn_bridge(&format!("http://127.0.0.1:{}", upstream_addr.port())).await;

    let mut response = reqwest::Client::new()
        .post(format!("http://{}/api/generate", bridge))
        .header("x-auth-token", &secret)
        .json(&json!({ "model": "llama3:8b", "prompt": "Hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

    // The upstream holds the second chunk until released
    let first = tokio::time::timeout(Duration::from_secs(5), response.chunk())
        .await
        .expect("first chunk should arrive before the stream completes")
        .unwrap()
        .unwrap();
    let first = String::from_utf8(first.to_vec()).unwrap();
    assert!(first.contains("\"model\":\"llama3:8b\""));
    assert!(first.contains("Hel"));

    upstream.gate.notify_one();
    let mut rest = Vec::new();
    while let Some(chunk) = response.chunk().await.unwrap() {
        rest.extend_from_slice(&chunk);
    }
    assert!(String::from_utf8(rest).unwrap().contains("\"done\":true"));
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let port = support::closed_port().await;
    let (bridge, secret) = spawn_bridge(&format!("http://127.0.0.1:{}", port)).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/api/tags", bridge))
        .header("x-auth-token", &secret)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Proxy Error");
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));

    // The listener keeps serving
    let response = client
        .get(format!("http://{}/health", bridge))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_preflight_and_health_need_no_token() {
    let (upstream_addr, upstream) = spawn_upstream().await;
    let (bridge, _secret) = spawn_bridge(&format!("http://127.0.0.1:{}", upstream_addr.port())).await;
    let client = reqwest::Client::new();

    let response = client
        .request(reqwest::Method::OPTIONS, format!("http://{}/api/chat", bridge))
        .header("origin", "https://chat.example.com")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(response.headers()["access-control-allow-headers"], "*");
    assert!(
        response.headers()["access-control-allow-methods"]
            .to_str()
            .unwrap()
            .contains("POST")
    );

    let response = client
        .get(format!("http://{}/health", bridge))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok" }));

    assert_eq!(upstream.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_routes_are_not_found() {
    let (upstream_addr, upstream) = spawn_upstream().await;
    let (bridge, secret) = spawn_bridge(&format!("http://127.0.0.1:{}", upstream_addr.port())).await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/v1/models", bridge))
        .header("x-auth-token", &secret)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 0);
}

/// WebSocket echo server standing in for the upstream
async fn spawn_ws_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if (message.is_text() || message.is_binary()) && ws.send(message).await.is_err()
                    {
                        break;
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_websocket_upgrade_is_relayed() {
    let upstream_addr = spawn_ws_upstream().await;
    let (bridge, secret) = spawn_bridge(&format!("http://127.0.0.1:{}", upstream_addr.port())).await;

    let mut request = format!("ws://{}/api/ws", bridge)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("x-auth-token", secret.parse().unwrap());

    let (mut ws, response) = tokio::time::timeout(
        Duration::from_secs(5),
        tokio_tungstenite::connect_async(request),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);

    ws.send(WsMessage::Text("hello".into())).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply.to_text().unwrap(), "hello");
}

#[tokio::test]
async fn test_websocket_upgrade_needs_token() {
    let upstream_addr = spawn_ws_upstream().await;
    let (bridge, _secret) = spawn_bridge(&format!("http://127.0.0.1:{}", upstream_addr.port())).await;

    let result = tokio_tungstenite::connect_async(format!("ws://{}/api/ws", bridge)).await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED)
        }
        other => panic!("expected 401, got {:?}", other.map(|(_, r)| r.status())),
    }
}
