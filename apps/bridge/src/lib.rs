//! Ollama bridge
//!
//! Exposes a local inference server to a remote client through a temporary
//! public tunnel. Every request must carry the per-run secret; the gateway
//! strips it and relays the exchange (streaming and protocol upgrades
//! included) to the upstream service.

pub mod auth;
pub mod config;
pub mod cors;
pub mod credentials;
pub mod display;
pub mod error;
pub mod lifecycle;
pub mod port;
pub mod probe;
pub mod proxy;
pub mod server;
pub mod tunnel;
pub mod upstream;

pub use config::{Args, Config};
pub use error::BridgeError;
pub use lifecycle::{LifecycleController, LifecycleState, ShutdownReason};
pub use upstream::UpstreamTarget;
