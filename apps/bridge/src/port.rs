//! Local port allocation
//!
//! Ports are probed by binding `127.0.0.1:<port>` and releasing it at once,
//! so the result is only a hint: another process may take the port before
//! the listener binds it.

use ollama_bridge_common::constants::{DEFAULT_LOCAL_PORT, MAX_PORT_ATTEMPTS};
use std::net::Ipv4Addr;
use tokio::net::TcpListener;
use tracing::debug;

use crate::error::BridgeError;

/// Find a free local port, starting at `preferred` (or the default port)
pub async fn allocate(preferred: Option<u16>) -> Result<u16, BridgeError> {
    allocate_from(preferred.unwrap_or(DEFAULT_LOCAL_PORT), MAX_PORT_ATTEMPTS).await
}

/// Smallest free port `>= start`, trying at most `max_attempts` ports
pub async fn allocate_from(start: u16, max_attempts: u32) -> Result<u16, BridgeError> {
    // Port 0 asks the OS for any free port
    if start == 0 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|source| BridgeError::Bind { port: 0, source })?;
        let port = listener
            .local_addr()
            .map_err(|source| BridgeError::Bind { port: 0, source })?
            .port();
        return Ok(port);
    }

    let mut port = start;
    let mut attempts = 1;
    loop {
        if is_available(port).await {
            if port != start {
                debug!("Port {} is in use, using {} instead", start, port);
            }
            return Ok(port);
        }

        if attempts >= max_attempts || port == u16::MAX {
            return Err(BridgeError::PortExhausted { start, end: port });
        }
        attempts += 1;
        port += 1;
    }
}

/// Whether `127.0.0.1:<port>` can be bound right now
pub async fn is_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await.is_ok()
}
