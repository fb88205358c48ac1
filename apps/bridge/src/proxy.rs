//! Streaming reverse proxy to the upstream inference service
//!
//! Requests under `/api` are relayed with the prefix removed. Bodies stream
//! in both directions so token-by-token generation reaches the client as it
//! is produced. Protocol upgrades (WebSocket) are relayed as raw byte pipes
//! once both sides have switched protocols.

use axum::{
    Json,
    body::Body,
    extract::Request,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{
            CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, ORIGIN, PROXY_AUTHENTICATE,
            PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE, USER_AGENT,
        },
    },
    response::{IntoResponse, Response},
};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use ollama_bridge_common::constants::{API_PREFIX, AUTH_HEADER, USER_AGENT as BRIDGE_AGENT};
use reqwest::{Client, redirect::Policy};
use serde_json::json;
use std::{error::Error as StdError, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{cors::apply_cors_headers, upstream::UpstreamTarget};

/// Hop-by-hop headers, never forwarded in either direction
const HOP_BY_HOP: [HeaderName; 6] = [
    CONNECTION,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
];

#[derive(Error, Debug)]
pub enum ProxyError {
    /// The upstream could not be reached or broke off mid-exchange
    #[error("{0}")]
    Upstream(String),
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Upstream(describe(&err))
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let ProxyError::Upstream(message) = &self;
        error!("Proxy Error: {}", message);
        let mut response = (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": "Proxy Error", "message": message })),
        )
            .into_response();
        apply_cors_headers(response.headers_mut());
        response
    }
}

/// Relays gateway requests to the upstream
#[derive(Debug, Clone)]
pub struct ProxyForwarder {
    upstream: Arc<UpstreamTarget>,
    client: Client,
}

impl ProxyForwarder {
    pub fn new(upstream: UpstreamTarget) -> reqwest::Result<Self> {
        // No overall timeout: generation streams can run for minutes
        let client = upstream.client_builder().redirect(Policy::none()).build()?;
        Ok(Self {
            upstream: Arc::new(upstream),
            client,
        })
    }

    /// Forward one authorized request to `upstream_path` and relay the answer
    ///
    /// `upstream_path` is the request's path and query with the `/api`
    /// prefix already stripped.
    pub async fn forward(
        &self,
        upstream_path: &str,
        mut request: Request,
    ) -> Result<Response, ProxyError> {
        let target = self.upstream.join(upstream_path);

        let upgrade = is_upgrade_request(request.headers());
        let client_upgrade = upgrade.then(|| hyper::upgrade::on(&mut request));

        let (parts, body) = request.into_parts();
        debug!("{} {} -> {}", parts.method, parts.uri, target);

        let headers = outbound_headers(&parts.headers, &self.upstream, upgrade);
        let mut builder = self.client.request(parts.method, target).headers(headers);
        if carries_body(&parts.headers) {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream_response = builder.send().await?;

        if let Some(client_upgrade) = client_upgrade
            && upstream_response.status() == StatusCode::SWITCHING_PROTOCOLS
        {
            return relay_upgrade(upstream_response, client_upgrade).await;
        }

        let status = upstream_response.status();
        let mut headers = upstream_response.headers().clone();
        for name in HOP_BY_HOP.iter().chain([&UPGRADE]) {
            headers.remove(name);
        }
        headers.remove("keep-alive");
        normalize_content_type(status, &mut headers);
        apply_cors_headers(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// `/api/tags?x=1` -> `/tags?x=1`; `None` outside the `/api` prefix
pub fn strip_api_prefix(path_and_query: &str) -> Option<String> {
    let rest = path_and_query.strip_prefix(API_PREFIX)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else if rest.starts_with('?') {
        Some(format!("/{}", rest))
    } else {
        None
    }
}

/// Whether the client asks to switch protocols
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            })
            .unwrap_or(false)
    });
    connection_upgrade && headers.contains_key(UPGRADE)
}

fn carries_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}

/// Headers sent to the upstream
///
/// Client identity (`Host`, `Origin`) is replaced with the upstream's own so
/// the inference server sees a same-origin local caller, and the secret
/// token never leaves the bridge.
pub fn outbound_headers(inbound: &HeaderMap, upstream: &UpstreamTarget, upgrade: bool) -> HeaderMap {
    let mut headers = inbound.clone();

    for name in HOP_BY_HOP.iter().chain([&UPGRADE, &HOST, &ORIGIN]) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove(AUTH_HEADER);

    if upgrade {
        headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
        if let Some(protocol) = inbound.get(UPGRADE) {
            headers.insert(UPGRADE, protocol.clone());
        }
    }

    if let Ok(host) = HeaderValue::from_str(&upstream.authority()) {
        headers.insert(HOST, host);
    }
    if let Ok(origin) = HeaderValue::from_str(&upstream.origin()) {
        headers.insert(ORIGIN, origin);
    }
    headers.insert(USER_AGENT, HeaderValue::from_static(BRIDGE_AGENT));

    headers
}

/// Answer JSON-family bodies (and untyped ones) as `application/json`
///
/// Streaming endpoints answer `application/x-ndjson`; browser clients of the
/// bridge expect plain JSON. Other types (images, text) are left alone.
pub fn normalize_content_type(status: StatusCode, headers: &mut HeaderMap) {
    let json_family = match headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        Some(value) => {
            let essence = value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            essence.ends_with("/json")
                || essence.ends_with("+json")
                || essence == "application/x-ndjson"
        }
        None => status != StatusCode::NO_CONTENT && status != StatusCode::NOT_MODIFIED,
    };

    if json_family {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
}

/// Answer 101 to the client and splice both upgraded connections
async fn relay_upgrade(
    upstream_response: reqwest::Response,
    client_upgrade: OnUpgrade,
) -> Result<Response, ProxyError> {
    let status = upstream_response.status();
    let mut headers = upstream_response.headers().clone();
    apply_cors_headers(&mut headers);

    let mut upstream_io = upstream_response.upgrade().await?;

    tokio::spawn(async move {
        let mut client_io = match client_upgrade.await {
            Ok(upgraded) => TokioIo::new(upgraded),
            Err(e) => {
                warn!("Client upgrade failed: {}", e);
                return;
            }
        };

        match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
            Ok((to_upstream, to_client)) => debug!(
                "Upgraded connection closed ({} bytes up, {} bytes down)",
                to_upstream, to_client
            ),
            Err(e) => debug!("Upgraded connection ended: {}", e),
        }
    });

    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Error text including its source chain
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
