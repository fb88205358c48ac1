//! Command line surface and the typed configuration built from it

use clap::{Parser, ValueEnum};
use ollama_bridge_common::{
    constants::{
        DEFAULT_EVENT_CAPACITY, DEFAULT_RELAY_HOST, DEFAULT_SKIP_WARNING_HEADER_PATTERN,
        DEFAULT_UPSTREAM_URL, HEARTBEAT_INTERVAL_SECS, MANAGED_CONNECT_TIMEOUT_SECS,
        PROBE_TIMEOUT_SECS, TUNNEL_OPEN_TIMEOUT_SECS,
    },
    validation::{DomainAllowList, validate_subdomain},
};
use regex::Regex;
use std::time::Duration;
use url::Url;

use crate::{
    error::BridgeError,
    tunnel::{ManagedConfig, RelayConfig, TunnelManager},
    upstream::UpstreamTarget,
};

/// Tunnel provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TunnelKind {
    /// Anonymous localtunnel-compatible relay
    Relay,
    /// Credentialed provider speaking the tunnel WebSocket protocol
    Managed,
}

/// CLI arguments for the bridge
#[derive(Parser, Debug)]
#[command(name = "ollama-bridge")]
#[command(about = "Expose a local Ollama server through a secured temporary tunnel", long_about = None)]
#[command(version)]
pub struct Args {
    /// Ollama server URL
    #[arg(long, env = "OLLAMA_URL", default_value = DEFAULT_UPSTREAM_URL)]
    pub ollama_url: String,

    /// Local port to listen on (the next free port is used when taken)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Subdomain to request from the relay
    #[arg(short, long)]
    pub subdomain: Option<String>,

    /// Print the connection details as a JSON payload to paste into a client
    #[arg(long)]
    pub qr: bool,

    /// Tunnel provider to use
    #[arg(long, value_enum, default_value_t = TunnelKind::Relay)]
    pub tunnel: TunnelKind,

    /// Managed tunnel credential; saved for later runs when given
    #[arg(long, env = "OLLAMA_BRIDGE_AUTHTOKEN", hide_env_values = true)]
    pub authtoken: Option<String>,

    /// Relay server
    #[arg(long, env = "OLLAMA_BRIDGE_RELAY_HOST", default_value = DEFAULT_RELAY_HOST)]
    pub relay_host: String,

    /// Managed tunnel WebSocket endpoint
    #[arg(long, env = "OLLAMA_BRIDGE_ENDPOINT")]
    pub managed_endpoint: Option<String>,

    /// Domain the managed tunnel may be assigned (repeatable, `*.` wildcards allowed)
    #[arg(long = "allowed-domain")]
    pub allowed_domains: Vec<String>,

    /// Pattern of provider warning-bypass headers dropped from tunneled requests
    #[arg(long, default_value = DEFAULT_SKIP_WARNING_HEADER_PATTERN)]
    pub skip_warning_header: String,

    /// Capacity of the tunnel event channel
    #[arg(long, default_value_t = DEFAULT_EVENT_CAPACITY)]
    pub force_max_listeners: usize,

    /// Upstream probe timeout in seconds
    #[arg(long, default_value_t = PROBE_TIMEOUT_SECS)]
    pub probe_timeout: u64,

    /// Tunnel open timeout in seconds
    #[arg(long, default_value_t = TUNNEL_OPEN_TIMEOUT_SECS)]
    pub tunnel_timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Configuration for one bridge run
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream inference service
    pub upstream: UpstreamTarget,

    /// First local port to try
    pub preferred_port: Option<u16>,

    /// Whether to print the machine-readable connection payload
    pub display_payload: bool,

    /// Upstream probe timeout
    pub probe_timeout: Duration,

    /// Tunnel provider and its settings
    pub tunnel: TunnelManager,
}

impl Config {
    /// Build the run configuration
    ///
    /// `credential` is the managed tunnel credential already resolved
    /// against the credential store.
    pub fn from_args(args: Args, credential: Option<String>) -> Result<Self, BridgeError> {
        let upstream = UpstreamTarget::parse(&args.ollama_url)?;

        let open_timeout = Duration::from_secs(args.tunnel_timeout);
        let tunnel = match args.tunnel {
            TunnelKind::Relay => {
                if let Some(subdomain) = &args.subdomain {
                    validate_subdomain(subdomain)
                        .map_err(|e| BridgeError::Config(e.to_string()))?;
                }
                let host = Url::parse(&args.relay_host).map_err(|e| {
                    BridgeError::Config(format!("invalid relay host {}: {}", args.relay_host, e))
                })?;
                TunnelManager::relay(
                    RelayConfig {
                        host,
                        subdomain: args.subdomain,
                    },
                    open_timeout,
                    args.force_max_listeners,
                )
            }
            TunnelKind::Managed => {
                let endpoint = args.managed_endpoint.ok_or_else(|| {
                    BridgeError::Config(
                        "the managed tunnel needs --managed-endpoint or OLLAMA_BRIDGE_ENDPOINT"
                            .to_string(),
                    )
                })?;
                let allowed_domains = DomainAllowList::parse(&args.allowed_domains)
                    .map_err(|e| BridgeError::Config(e.to_string()))?;
                let skip_warning_header = Regex::new(&args.skip_warning_header).map_err(|e| {
                    BridgeError::Config(format!("invalid --skip-warning-header: {}", e))
                })?;
                TunnelManager::managed(
                    ManagedConfig {
                        endpoint,
                        credential,
                        allowed_domains,
                        skip_warning_header,
                        connect_timeout: Duration::from_secs(MANAGED_CONNECT_TIMEOUT_SECS),
                        heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
                    },
                    open_timeout,
                    args.force_max_listeners,
                )
            }
        };

        Ok(Self {
            upstream,
            preferred_port: args.port,
            display_payload: args.qr,
            probe_timeout: Duration::from_secs(args.probe_timeout),
            tunnel,
        })
    }
}
