use ollama_bridge_common::TunnelError;
use thiserror::Error;

use crate::credentials::CredentialError;

/// Startup and lifecycle failures of the bridge
///
/// All of these are fatal; per-request failures live in
/// [`crate::proxy::ProxyError`] and never reach this type.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to connect to Ollama at {0}")]
    UpstreamUnreachable(String),

    #[error("No free local port between {start} and {end}")]
    PortExhausted { start: u16, end: u16 },

    #[error("Failed to lower bridge: {0}")]
    Tunnel(#[from] TunnelError),

    #[error("Failed to bind local listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}
