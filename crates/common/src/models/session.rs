use serde::Serialize;
use std::fmt;

use crate::utils::current_timestamp_secs;

/// The single per-run secret/port/URL tuple authorizing access to the bridge
///
/// Built once the tunnel is up and the listener is bound, then shared
/// read-only with every request handler.
#[derive(Clone)]
pub struct Session {
    secret_token: String,

    /// Port of the local listener the tunnel forwards to
    pub local_port: u16,

    /// Public URL handed out by the tunnel provider
    pub public_url: String,

    /// Timestamp when the session was created (Unix epoch seconds)
    pub created_at: i64,
}

impl Session {
    /// Create a new session stamped with the current time
    pub fn new(secret_token: String, local_port: u16, public_url: String) -> Self {
        Self {
            secret_token,
            local_port,
            public_url,
            created_at: current_timestamp_secs(),
        }
    }

    /// The secret every inbound request must present
    pub fn secret_token(&self) -> &str {
        &self.secret_token
    }

    /// Loopback URL of the local listener
    pub fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.local_port)
    }

    /// Payload handed to the authorized client out of band
    pub fn connection_details(&self) -> ConnectionDetails<'_> {
        ConnectionDetails {
            url: &self.public_url,
            token: &self.secret_token,
        }
    }
}

// The token must never end up in logs through a stray `{:?}`
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("secret_token", &"<redacted>")
            .field("local_port", &self.local_port)
            .field("public_url", &self.public_url)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Connection details shown to the operator for the remote client
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionDetails<'a> {
    pub url: &'a str,
    pub token: &'a str,
}
