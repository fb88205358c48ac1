//! Local gateway listener
//!
//! Routes: `GET /health` answers locally; anything under `/api` goes to the
//! upstream; the rest is 404. The auth gateway wraps all of them.

use axum::{
    Json, Router,
    extract::{FromRef, Request, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use ollama_bridge_common::{Session, constants::HEALTH_PATH};
use serde_json::json;
use std::{net::Ipv4Addr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    auth::auth_gateway,
    cors::apply_cors_headers,
    error::BridgeError,
    proxy::{ProxyForwarder, strip_api_prefix},
};

/// Shared state of the gateway
#[derive(Debug, Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub forwarder: ProxyForwarder,
}

impl FromRef<AppState> for Arc<Session> {
    fn from_ref(state: &AppState) -> Self {
        state.session.clone()
    }
}

impl FromRef<AppState> for ProxyForwarder {
    fn from_ref(state: &AppState) -> Self {
        state.forwarder.clone()
    }
}

/// Build the gateway router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .fallback(dispatch)
        .layer(middleware::from_fn_with_state(state.clone(), auth_gateway))
        .with_state(state)
}

/// Bind the listener on the loopback interface
pub async fn bind(port: u16) -> Result<TcpListener, BridgeError> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .await
        .map_err(|source| BridgeError::Bind { port, source })?;
    info!("Listening on 127.0.0.1:{}", port);
    Ok(listener)
}

async fn health() -> Response {
    let mut response = Json(json!({ "status": "ok" })).into_response();
    apply_cors_headers(response.headers_mut());
    response
}

async fn dispatch(State(forwarder): State<ProxyForwarder>, request: Request) -> Response {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    match strip_api_prefix(path_and_query) {
        Some(upstream_path) => forwarder
            .forward(&upstream_path, request)
            .await
            .into_response(),
        None => {
            let mut response =
                (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" }))).into_response();
            apply_cors_headers(response.headers_mut());
            response
        }
    }
}
