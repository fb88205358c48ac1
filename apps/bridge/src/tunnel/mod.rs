//! Public tunnel providers
//!
//! A [`TunnelManager`] opens one tunnel forwarding public traffic to the
//! local listener port and hands back a [`TunnelHandle`]: the public URL,
//! an event stream reporting failure or closure, and `close()`.

mod handle;
pub mod managed;
pub mod relay;

pub use handle::{TunnelContext, TunnelHandle};
pub use managed::ManagedConfig;
pub use relay::RelayConfig;

use ollama_bridge_common::TunnelError;
use std::time::Duration;
use tracing::info;

/// Provider family with its settings
#[derive(Debug, Clone)]
pub enum TunnelStrategy {
    Relay(RelayConfig),
    Managed(ManagedConfig),
}

/// Opens tunnels for the configured provider
#[derive(Debug, Clone)]
pub struct TunnelManager {
    pub(crate) strategy: TunnelStrategy,
    pub(crate) open_timeout: Duration,
    pub(crate) event_capacity: usize,
}

impl TunnelManager {
    pub fn relay(config: RelayConfig, open_timeout: Duration, event_capacity: usize) -> Self {
        Self {
            strategy: TunnelStrategy::Relay(config),
            open_timeout,
            event_capacity,
        }
    }

    pub fn managed(config: ManagedConfig, open_timeout: Duration, event_capacity: usize) -> Self {
        Self {
            strategy: TunnelStrategy::Managed(config),
            open_timeout,
            event_capacity,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.strategy {
            TunnelStrategy::Relay(_) => "relay",
            TunnelStrategy::Managed(_) => "managed",
        }
    }

    /// Open a tunnel to `127.0.0.1:<local_port>`
    ///
    /// Fails with [`TunnelError::Timeout`] when the provider has not assigned
    /// a public URL within the open timeout.
    pub async fn open(&self, local_port: u16) -> Result<TunnelHandle, TunnelError> {
        info!("Opening {} tunnel to local port {}", self.name(), local_port);

        let opening = async {
            match &self.strategy {
                TunnelStrategy::Relay(config) => {
                    relay::open(config, local_port, self.event_capacity).await
                }
                TunnelStrategy::Managed(config) => {
                    managed::open(config, local_port, self.event_capacity).await
                }
            }
        };

        let handle = tokio::time::timeout(self.open_timeout, opening)
            .await
            .map_err(|_| TunnelError::Timeout(self.open_timeout))??;

        info!("Tunnel open at {}", handle.public_url());
        Ok(handle)
    }
}
