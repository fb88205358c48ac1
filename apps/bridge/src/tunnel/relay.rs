//! Anonymous relay tunnel (localtunnel protocol)
//!
//! The relay assigns a public URL and a TCP port on its own host. The bridge
//! keeps a pool of raw TCP connections to that port; each one carries one
//! public HTTP exchange at a time, which is spliced onto a fresh connection
//! to the local listener.

use ollama_bridge_common::{
    RelayAssignment, TunnelError, TunnelEvent,
    constants::{DEFAULT_RELAY_MAX_CONN, RELAY_LOCAL_RETRY_MS},
    protocol::RelayReply,
    validation::validate_subdomain,
};
use reqwest::Client;
use std::{
    io,
    net::Ipv4Addr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::{debug, info, warn};
use url::Url;

use super::{TunnelContext, TunnelHandle};

/// Relay settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay server base URL
    pub host: Url,

    /// Subdomain to ask for; the relay picks one when absent
    pub subdomain: Option<String>,
}

/// Ask the relay for an endpoint and start the connection pool
pub async fn open(
    config: &RelayConfig,
    local_port: u16,
    event_capacity: usize,
) -> Result<TunnelHandle, TunnelError> {
    if let Some(subdomain) = &config.subdomain {
        validate_subdomain(subdomain)?;
    }

    let assignment = request_assignment(config).await?;

    if let Some(requested) = &config.subdomain
        && assignment.id != *requested
    {
        return Err(TunnelError::ProviderRejected(format!(
            "subdomain {} is taken (relay offered {})",
            requested, assignment.id
        )));
    }

    let remote_host = config
        .host
        .host_str()
        .ok_or_else(|| TunnelError::ProviderRejected(format!("relay {} has no host", config.host)))?
        .to_string();
    let max_conn = assignment
        .max_conn_count
        .unwrap_or(DEFAULT_RELAY_MAX_CONN)
        .max(1);

    info!(
        "Relay assigned {} ({} connections via {}:{})",
        assignment.url, max_conn, remote_host, assignment.port
    );

    let (mut handle, context) = TunnelHandle::new(assignment.url.clone(), event_capacity);
    let established = Arc::new(AtomicBool::new(false));

    for slot in 0..max_conn {
        let link = RelayLink {
            slot,
            remote_host: remote_host.clone(),
            remote_port: assignment.port,
            local_port,
            established: established.clone(),
        };
        handle.spawn(run_link(link, context.clone()));
    }

    Ok(handle)
}

/// `GET <host>/?new`, or `GET <host>/<subdomain>` for a specific name
async fn request_assignment(config: &RelayConfig) -> Result<RelayAssignment, TunnelError> {
    let url = match &config.subdomain {
        Some(subdomain) => config.host.join(subdomain).map_err(|e| {
            TunnelError::ProviderRejected(format!("invalid relay URL for {}: {}", subdomain, e))
        })?,
        None => {
            let mut url = config.host.clone();
            url.set_query(Some("new"));
            url
        }
    };
    debug!("Requesting relay endpoint: {}", url);

    let response = Client::new().get(url).send().await.map_err(|e| {
        TunnelError::ProviderRejected(format!("relay {} is unreachable: {}", config.host, e))
    })?;
    let status = response.status();
    let body = response.text().await.map_err(|e| {
        TunnelError::ProviderRejected(format!("relay {} broke off: {}", config.host, e))
    })?;

    match serde_json::from_str::<RelayReply>(&body) {
        Ok(RelayReply::Assigned(assignment)) if status.is_success() => Ok(assignment),
        Ok(RelayReply::Rejected { message }) => Err(TunnelError::ProviderRejected(message)),
        _ => Err(TunnelError::ProviderRejected(format!(
            "relay {} answered {}",
            config.host, status
        ))),
    }
}

/// One pooled connection slot
#[derive(Debug)]
struct RelayLink {
    slot: usize,
    remote_host: String,
    remote_port: u16,
    local_port: u16,
    // Set once any slot reached the relay
    established: Arc<AtomicBool>,
}

/// What a slot does after failing to reach the relay
#[derive(Debug)]
enum LinkFailure {
    /// Back off and dial again
    Retry,
    /// Report the event and stop the slot
    Fatal(TunnelEvent),
}

/// Classify a failed relay dial
///
/// Before the tunnel ever connected, any failure means the relay port is
/// unreachable. Once connected, a refusal means the relay dropped the tunnel
/// while other failures (reset, timeout, unreachable network) are transient.
fn classify_connect_error(
    error: &io::Error,
    established: bool,
    remote_host: &str,
    remote_port: u16,
) -> LinkFailure {
    match (error.kind(), established) {
        (io::ErrorKind::ConnectionRefused, true) => LinkFailure::Fatal(TunnelEvent::Closed),
        (io::ErrorKind::ConnectionRefused, false) => LinkFailure::Fatal(TunnelEvent::Error(format!(
            "connection refused: {}:{} (check your firewall settings)",
            remote_host, remote_port
        ))),
        (_, true) => LinkFailure::Retry,
        (_, false) => LinkFailure::Fatal(TunnelEvent::Error(format!(
            "relay connection to {}:{} failed: {}",
            remote_host, remote_port, error
        ))),
    }
}

/// Keep one relay connection alive until the tunnel closes
async fn run_link(link: RelayLink, mut context: TunnelContext) {
    loop {
        let connect = TcpStream::connect((link.remote_host.as_str(), link.remote_port));
        let remote = tokio::select! {
            _ = context.cancelled() => return,
            result = connect => result,
        };

        let remote = match remote {
            Ok(remote) => {
                link.established.store(true, Ordering::SeqCst);
                remote
            }
            Err(e) => {
                let established = link.established.load(Ordering::SeqCst);
                match classify_connect_error(&e, established, &link.remote_host, link.remote_port)
                {
                    LinkFailure::Retry => {
                        warn!("Relay slot {} lost its connection ({}), retrying", link.slot, e);
                        let backoff = Duration::from_millis(RELAY_LOCAL_RETRY_MS);
                        tokio::select! {
                            _ = context.cancelled() => return,
                            _ = tokio::time::sleep(backoff) => continue,
                        }
                    }
                    LinkFailure::Fatal(event) => {
                        if matches!(event, TunnelEvent::Closed) {
                            info!("Relay closed the tunnel");
                        }
                        context.emit(event);
                        return;
                    }
                }
            }
        };
        debug!("Relay slot {} connected", link.slot);

        tokio::select! {
            _ = context.cancelled() => return,
            result = splice(remote, &link) => {
                if let Err(e) = result {
                    debug!("Relay slot {} ended: {}", link.slot, e);
                }
            }
        }
    }
}

/// Wait for a public request on `remote` and splice it onto the listener
async fn splice(mut remote: TcpStream, link: &RelayLink) -> io::Result<()> {
    let mut head = vec![0u8; 16 * 1024];
    let read = remote.read(&mut head).await?;
    if read == 0 {
        // Relay recycled an idle connection
        return Ok(());
    }

    let mut local = connect_local(link).await;
    local.write_all(&head[..read]).await?;

    let (to_local, to_remote) = tokio::io::copy_bidirectional(&mut remote, &mut local).await?;
    debug!(
        "Relay slot {} done ({} bytes in, {} bytes out)",
        link.slot,
        to_local + read as u64,
        to_remote
    );
    Ok(())
}

/// Connect to the local listener, waiting for it to come up
async fn connect_local(link: &RelayLink) -> TcpStream {
    loop {
        match TcpStream::connect((Ipv4Addr::LOCALHOST, link.local_port)).await {
            Ok(local) => return local,
            Err(e) => {
                warn!(
                    "Local listener on port {} not reachable ({}), retrying",
                    link.local_port, e
                );
                tokio::time::sleep(Duration::from_millis(RELAY_LOCAL_RETRY_MS)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(kind: io::ErrorKind, established: bool) -> LinkFailure {
        classify_connect_error(&io::Error::from(kind), established, "relay.test", 4242)
    }

    #[test]
    fn test_transient_failures_after_connecting_are_retried() {
        for kind in [
            io::ErrorKind::TimedOut,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::HostUnreachable,
            io::ErrorKind::NetworkUnreachable,
        ] {
            assert!(matches!(failure(kind, true), LinkFailure::Retry), "{:?}", kind);
        }
    }

    #[test]
    fn test_refusal_after_connecting_closes_the_tunnel() {
        assert!(matches!(
            failure(io::ErrorKind::ConnectionRefused, true),
            LinkFailure::Fatal(TunnelEvent::Closed)
        ));
    }

    #[test]
    fn test_failures_before_connecting_are_errors() {
        match failure(io::ErrorKind::ConnectionRefused, false) {
            LinkFailure::Fatal(TunnelEvent::Error(message)) => {
                assert_eq!(
                    message,
                    "connection refused: relay.test:4242 (check your firewall settings)"
                );
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert!(matches!(
            failure(io::ErrorKind::TimedOut, false),
            LinkFailure::Fatal(TunnelEvent::Error(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_subdomain_fails_before_any_request() {
        let config = RelayConfig {
            host: Url::parse("http://127.0.0.1:1").unwrap(),
            subdomain: Some("NO".to_string()),
        };
        assert!(matches!(
            open(&config, 3535, 4).await,
            Err(TunnelError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_rejected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = RelayConfig {
            host: Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap(),
            subdomain: None,
        };
        match open(&config, 3535, 4).await {
            Err(TunnelError::ProviderRejected(message)) => {
                assert!(message.contains("unreachable"))
            }
            other => panic!("expected rejection, got {:?}", other.map(|h| h.public_url().to_string())),
        }
    }
}
