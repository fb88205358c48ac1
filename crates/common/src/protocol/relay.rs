use serde::{Deserialize, Serialize};

/// Endpoint assigned by a localtunnel-compatible relay
///
/// Returned by `GET <host>/?new` or `GET <host>/<subdomain>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayAssignment {
    /// Subdomain the relay assigned
    pub id: String,

    /// Port on the relay host that accepts tunnel connections
    pub port: u16,

    /// How many tunnel connections the relay will accept at once
    #[serde(default)]
    pub max_conn_count: Option<usize>,

    /// Public URL clients use to reach the tunnel
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_url: Option<String>,
}

/// Either an assignment or the relay's reason for refusing one
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RelayReply {
    Assigned(RelayAssignment),
    Rejected { message: String },
}
