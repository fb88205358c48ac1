/// Upstream inference service used when none is configured
pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:11434";

/// First local port tried when no port is requested
pub const DEFAULT_LOCAL_PORT: u16 = 3535;

/// Upper bound on ports tried before giving up on allocation
pub const MAX_PORT_ATTEMPTS: u32 = 1000;

/// Well-known upstream endpoint used for the reachability probe
pub const PROBE_PATH: &str = "/api/tags";

/// Reachability probe timeout (10 seconds)
pub const PROBE_TIMEOUT_SECS: u64 = 10;

/// Bounded wait for a tunnel provider to hand out a public URL (10 seconds)
pub const TUNNEL_OPEN_TIMEOUT_SECS: u64 = 10;

/// Bounded wait for tunnel tasks to wind down during shutdown (3 seconds)
pub const TUNNEL_CLOSE_TIMEOUT_SECS: u64 = 3;

/// Default capacity of the tunnel lifecycle event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 25;

/// Number of secret random bytes in a session token (256 bits)
pub const SECRET_TOKEN_BYTES: usize = 32;

/// Header carrying the session token on inbound requests
pub const AUTH_HEADER: &str = "x-auth-token";

/// Path prefix that is proxied to the upstream root
pub const API_PREFIX: &str = "/api";

/// Unauthenticated liveness endpoint
pub const HEALTH_PATH: &str = "/health";

/// User-Agent presented to the upstream service
pub const USER_AGENT: &str = "ollama-bridge";

/// Methods advertised in CORS responses
pub const CORS_ALLOW_METHODS: &str = "GET,POST,PUT,DELETE,OPTIONS";

/// Free relay service used by the relay tunnel strategy
pub const DEFAULT_RELAY_HOST: &str = "https://localtunnel.me";

/// Number of relay connections kept open when the relay does not say
pub const DEFAULT_RELAY_MAX_CONN: usize = 10;

/// Delay between attempts to reach the local listener from a relay connection
pub const RELAY_LOCAL_RETRY_MS: u64 = 1000;

/// Header names injected to skip a tunnel provider's browser interstitial page
pub const DEFAULT_SKIP_WARNING_HEADER_PATTERN: &str = r"(?i)^([a-z0-9]+-)?skip-browser-warning$";

/// Heartbeat interval to keep the managed tunnel connection alive (5 minutes)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 300;

/// Connect timeout for requests relayed by the managed tunnel to the local listener
///
/// Replies stream for as long as the local listener produces them.
pub const MANAGED_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Namespace under which the tunnel credential is persisted between runs
pub const CREDENTIAL_NAMESPACE: &str = "ollama-bridge";
