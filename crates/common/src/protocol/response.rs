use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Head of the bridge's reply to a managed tunnel request
///
/// The body follows as `http_response_chunk` messages and the reply is
/// terminated by `http_response_end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Must match the request_id from the corresponding HttpRequest
    pub request_id: String,

    /// HTTP status code (200, 401, 502, etc.)
    pub status_code: u16,

    /// Response headers as a map of header name to list of values
    pub headers: HashMap<String, Vec<String>>,

    /// Time the local listener took to send its headers, in milliseconds
    #[serde(default)]
    pub processing_time_ms: u64,
}

impl HttpResponse {
    /// Create a new response head without headers
    pub fn new(request_id: String, status_code: u16) -> Self {
        Self {
            request_id,
            status_code,
            headers: HashMap::new(),
            processing_time_ms: 0,
        }
    }
}
