#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;

/// Serve `app` on an ephemeral loopback port
pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Fake relay API answering every request with `reply`
pub struct FakeRelay {
    pub base: String,
    pub requests: Arc<Mutex<Vec<String>>>,
}

pub async fn fake_relay(status: StatusCode, reply: Value) -> FakeRelay {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    let app = Router::new().fallback(move |request: Request| {
        let seen = seen.clone();
        let reply = reply.clone();
        async move {
            let target = request
                .uri()
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_default();
            seen.lock().unwrap().push(target);
            (status, Json(reply)).into_response()
        }
    });

    let addr = serve(app).await;
    FakeRelay {
        base: format!("http://127.0.0.1:{}", addr.port()),
        requests,
    }
}

/// Relay assignment JSON pointing tunnel connections at `port`
pub fn assignment(id: &str, port: u16, max_conn_count: usize) -> Value {
    serde_json::json!({
        "id": id,
        "port": port,
        "max_conn_count": max_conn_count,
        "url": format!("https://{}.loca.lt", id),
    })
}

/// Minimal upstream with a healthy probe endpoint
pub async fn healthy_upstream() -> SocketAddr {
    let app = Router::new().route(
        "/api/tags",
        axum::routing::get(|| async { Json(serde_json::json!({ "models": [] })) }),
    );
    serve(app).await
}

pub fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}
