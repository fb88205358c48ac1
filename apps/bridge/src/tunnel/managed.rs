//! Credentialed tunnel provider speaking the tunnel WebSocket protocol
//!
//! The bridge dials the provider, presents the stored credential as a bearer
//! token and is assigned a public URL. The provider then pushes public HTTP
//! requests as JSON messages; each is replayed against the local listener
//! and answered on the same socket, the body streamed chunk by chunk.

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use ollama_bridge_common::{
    ErrorCode, HttpRequest, HttpResponse, Message, TunnelError, TunnelEvent, headers_to_map,
    map_to_headers, strip_matching_headers,
    validation::{DomainAllowList, validate_path},
};
use regex::Regex;
use reqwest::{Client, Method, header::HOST};
use std::{sync::Arc, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message as WsMessage,
        client::IntoClientRequest,
        http::{HeaderValue, StatusCode, header::AUTHORIZATION},
    },
};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{TunnelContext, TunnelHandle};

type WebSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Managed provider settings
#[derive(Debug, Clone)]
pub struct ManagedConfig {
    /// Provider WebSocket endpoint
    pub endpoint: String,

    /// Bearer credential; opening fails fast without one
    pub credential: Option<String>,

    /// Domains the assigned public URL may live on
    pub allowed_domains: DomainAllowList,

    /// Provider warning-bypass headers dropped before replay
    pub skip_warning_header: Regex,

    /// Connect timeout for replayed requests; bodies stream without a deadline
    pub connect_timeout: Duration,

    /// Interval of application-level pings
    pub heartbeat_interval: Duration,
}

/// Where provider requests are replayed
#[derive(Debug)]
struct LocalTarget {
    address: String,
    client: Client,
    skip_warning_header: Regex,
}

/// Connect, authenticate and start serving provider requests
pub async fn open(
    config: &ManagedConfig,
    local_port: u16,
    event_capacity: usize,
) -> Result<TunnelHandle, TunnelError> {
    let credential = config.credential.as_deref().ok_or_else(|| {
        TunnelError::MissingCredential(
            "no authtoken stored; run once with --authtoken <TOKEN> to save it".to_string(),
        )
    })?;

    let (mut ws_stream, public_url) = establish_connection(&config.endpoint, credential).await?;

    if let Err(e) = check_domain(&public_url, &config.allowed_domains) {
        let _ = ws_stream.close(None).await;
        return Err(e);
    }

    // Replays only ever target loopback
    let client = Client::builder()
        .no_proxy()
        .connect_timeout(config.connect_timeout)
        .build()
        .map_err(|e| TunnelError::HttpError(e.to_string()))?;
    let target = Arc::new(LocalTarget {
        address: format!("http://127.0.0.1:{}", local_port),
        client,
        skip_warning_header: config.skip_warning_header.clone(),
    });

    let (mut handle, context) = TunnelHandle::new(public_url, event_capacity);
    handle.spawn(run_connection(
        ws_stream,
        target,
        context,
        config.heartbeat_interval,
    ));
    Ok(handle)
}

/// Establish the WebSocket connection and perform the handshake
async fn establish_connection(
    endpoint: &str,
    credential: &str,
) -> Result<(WebSocket, String), TunnelError> {
    debug!("Connecting to {}", endpoint);

    let mut request = endpoint
        .into_client_request()
        .map_err(|e| TunnelError::ConnectionError(format!("Invalid endpoint: {}", e)))?;
    request.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", credential))
            .map_err(|e| TunnelError::ConnectionError(format!("Invalid authtoken: {}", e)))?,
    );

    let (mut ws_stream, _) = connect_async(request).await.map_err(|e| match e {
        tungstenite::Error::Http(response)
            if matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) =>
        {
            TunnelError::ProviderRejected(format!(
                "provider refused the authtoken ({})",
                response.status()
            ))
        }
        other => TunnelError::ConnectionError(other.to_string()),
    })?;

    debug!("WebSocket connected, sending Ready");
    let ready_json = serde_json::to_string(&Message::Ready)?;
    ws_stream
        .send(WsMessage::Text(ready_json.into()))
        .await
        .map_err(|e| TunnelError::WebSocketError(format!("Failed to send Ready: {}", e)))?;

    while let Some(message) = ws_stream.next().await {
        match message {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<Message>(&text) {
                Ok(Message::ConnectionEstablished {
                    connection_id,
                    public_url,
                    ..
                }) => {
                    debug!("Connection {} assigned {}", connection_id, public_url);
                    return Ok((ws_stream, public_url));
                }
                Ok(Message::Error { code, message, .. }) => {
                    return Err(TunnelError::ProviderRejected(format!(
                        "{} ({:?})",
                        message, code
                    )));
                }
                Ok(other) => debug!("Ignoring {:?} during handshake", other),
                Err(e) => warn!("Unparsable handshake message: {}", e),
            },
            Ok(WsMessage::Close(_)) => {
                return Err(TunnelError::ProviderRejected(
                    "provider closed the connection during handshake".to_string(),
                ));
            }
            Ok(_) => {}
            Err(e) => return Err(TunnelError::WebSocketError(e.to_string())),
        }
    }

    Err(TunnelError::ConnectionError(
        "connection closed before handshake".to_string(),
    ))
}

/// The assigned public host must be on the allow-list
fn check_domain(public_url: &str, allowed: &DomainAllowList) -> Result<(), TunnelError> {
    let url = Url::parse(public_url).map_err(|e| {
        TunnelError::InvalidMessage(format!("invalid public URL {}: {}", public_url, e))
    })?;
    let host = url.host_str().unwrap_or_default();

    if allowed.is_allowed(host) {
        Ok(())
    } else {
        Err(TunnelError::ProviderRejected(format!(
            "assigned domain {} is not allowed (allowed: {})",
            host,
            allowed.patterns().join(", ")
        )))
    }
}

/// Serve the open connection until it ends or the tunnel closes
async fn run_connection(
    ws_stream: WebSocket,
    target: Arc<LocalTarget>,
    mut context: TunnelContext,
    heartbeat_interval: Duration,
) {
    let (mut write, read) = ws_stream.split();
    let (outgoing_tx, outgoing_rx) = mpsc::channel(100);

    let serve = async {
        tokio::select! {
            event = write_loop(&mut write, outgoing_rx) => event,
            event = read_loop(read, outgoing_tx.clone(), target) => event,
            event = heartbeat_loop(outgoing_tx.clone(), heartbeat_interval) => event,
        }
    };

    let event = tokio::select! {
        _ = context.cancelled() => None,
        event = serve => Some(event),
    };

    match event {
        Some(event) => context.emit(event),
        None => {
            debug!("Closing provider connection");
            let _ = write.send(WsMessage::Close(None)).await;
        }
    }
}

/// Sends outgoing messages through the WebSocket
async fn write_loop(
    write: &mut SplitSink<WebSocket, WsMessage>,
    mut outgoing_rx: mpsc::Receiver<WsMessage>,
) -> TunnelEvent {
    while let Some(message) = outgoing_rx.recv().await {
        if let Err(e) = write.send(message).await {
            return TunnelEvent::Error(format!("Failed to send to provider: {}", e));
        }
    }
    TunnelEvent::Closed
}

/// Receives provider messages and dispatches them
async fn read_loop(
    mut read: SplitStream<WebSocket>,
    outgoing_tx: mpsc::Sender<WsMessage>,
    target: Arc<LocalTarget>,
) -> TunnelEvent {
    while let Some(message) = read.next().await {
        match message {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<Message>(&text) {
                Ok(Message::TunnelClosed { reason }) => {
                    info!(
                        "Provider closed the tunnel: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    );
                    return TunnelEvent::Closed;
                }
                Ok(message) => handle_message(message, &outgoing_tx, &target),
                Err(e) => error!("Failed to parse message: {}", e),
            },
            Ok(WsMessage::Ping(data)) => {
                if outgoing_tx.send(WsMessage::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => {
                info!("Provider closed the connection");
                return TunnelEvent::Closed;
            }
            Ok(_) => {}
            Err(e) => return TunnelEvent::Error(format!("WebSocket error: {}", e)),
        }
    }
    TunnelEvent::Closed
}

fn handle_message(message: Message, outgoing_tx: &mpsc::Sender<WsMessage>, target: &Arc<LocalTarget>) {
    match message {
        Message::HttpRequest(request) => {
            debug!("Received HTTP request: {} {}", request.method, request.uri);
            let target = target.clone();
            let outgoing_tx = outgoing_tx.clone();
            tokio::spawn(async move {
                replay_request(request, &target, &outgoing_tx).await;
            });
        }
        Message::Ping => {
            let outgoing_tx = outgoing_tx.clone();
            tokio::spawn(async move {
                send_message(&outgoing_tx, &Message::Pong).await;
            });
        }
        Message::Pong => debug!("Received pong"),
        Message::Error {
            request_id,
            code,
            message,
        } => error!(
            "Provider error: {:?} - {} (request_id: {:?})",
            code, message, request_id
        ),
        other => warn!("Unexpected message: {:?}", other),
    }
}

/// Queue a message for the provider; false once the connection is gone
async fn send_message(outgoing_tx: &mpsc::Sender<WsMessage>, message: &Message) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => outgoing_tx.send(WsMessage::Text(json.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            false
        }
    }
}

/// Replay one provider request against the local listener
///
/// The reply is an `http_response` head, one `http_response_chunk` per body
/// chunk as the local listener yields it, then `http_response_end`. Failures
/// before the head, or while streaming, are answered with `error`.
async fn replay_request(
    request: HttpRequest,
    target: &LocalTarget,
    outgoing_tx: &mpsc::Sender<WsMessage>,
) {
    let started = Instant::now();
    let request_id = request.request_id.clone();

    let response = match send_local(request, target).await {
        Ok(response) => response,
        Err(reply) => {
            send_message(outgoing_tx, &reply).await;
            return;
        }
    };

    let mut head = HttpResponse::new(request_id.clone(), response.status().as_u16());
    head.headers = headers_to_map(response.headers());
    head.processing_time_ms = started.elapsed().as_millis() as u64;
    debug!(
        "Response: {} ({}ms to headers)",
        head.status_code, head.processing_time_ms
    );
    if !send_message(outgoing_tx, &Message::HttpResponse(head)).await {
        return;
    }

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let reply = match chunk {
            Ok(chunk) => Message::response_chunk(&request_id, &chunk),
            Err(e) => {
                warn!("Local response for {} broke off: {}", request_id, e);
                send_message(
                    outgoing_tx,
                    &Message::request_error(
                        &request_id,
                        ErrorCode::LocalServiceUnavailable,
                        format!("Failed to read local response: {}", e),
                    ),
                )
                .await;
                return;
            }
        };
        if !send_message(outgoing_tx, &reply).await {
            debug!("Provider went away, dropping {}", request_id);
            return;
        }
    }

    let elapsed = started.elapsed().as_millis() as u64;
    debug!("Response {} complete ({}ms)", request_id, elapsed);
    send_message(outgoing_tx, &Message::response_end(&request_id, elapsed)).await;
}

/// Validate a provider request and send it to the local listener
async fn send_local(
    mut request: HttpRequest,
    target: &LocalTarget,
) -> Result<reqwest::Response, Message> {
    let request_id = request.request_id.clone();

    let removed = strip_matching_headers(&mut request.headers, &target.skip_warning_header);
    if !removed.is_empty() {
        debug!("Dropped provider headers: {}", removed.join(", "));
    }

    let uri = validate_path(&request.uri).map_err(|e| {
        Message::request_error(&request_id, ErrorCode::InvalidRequest, e.to_string())
    })?;
    let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
        Message::request_error(
            &request_id,
            ErrorCode::InvalidRequest,
            format!("Unsupported HTTP method: {}", request.method),
        )
    })?;
    let body = request.body_bytes().map_err(|e| {
        Message::request_error(
            &request_id,
            ErrorCode::InvalidRequest,
            format!("Failed to decode body: {}", e),
        )
    })?;

    let mut headers = map_to_headers(&request.headers);
    headers.remove(HOST);

    let mut builder = target
        .client
        .request(method, format!("{}{}", target.address, uri))
        .headers(headers);
    if !body.is_empty() {
        builder = builder.body(body);
    }

    builder.send().await.map_err(|e| {
        error!("Local service error: {}", e);
        Message::request_error(
            &request_id,
            ErrorCode::LocalServiceUnavailable,
            e.to_string(),
        )
    })
}

/// Application-level pings keeping idle provider connections open
async fn heartbeat_loop(outgoing_tx: mpsc::Sender<WsMessage>, interval: Duration) -> TunnelEvent {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        ticker.tick().await;

        let ping_json = match serde_json::to_string(&Message::Ping) {
            Ok(json) => json,
            Err(e) => return TunnelEvent::Error(e.to_string()),
        };
        if outgoing_tx.send(WsMessage::Text(ping_json.into())).await.is_err() {
            return TunnelEvent::Closed;
        }
        debug!("Sent heartbeat");
    }
}
