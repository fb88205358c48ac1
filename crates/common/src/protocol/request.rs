use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::utils::decode_body;

/// An HTTP request pushed by the managed tunnel provider to the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Correlates the request with the bridge's reply
    pub request_id: String,

    /// HTTP method (GET, POST, PUT, DELETE, etc.)
    pub method: String,

    /// Request URI including path and query string
    /// Example: "/api/chat?stream=false"
    pub uri: String,

    /// HTTP headers as a map of header name to list of values
    pub headers: HashMap<String, Vec<String>>,

    /// Request body encoded in Base64, empty for requests without body
    #[serde(default)]
    pub body: String,

    /// Timestamp when the provider received the request (Unix epoch in milliseconds)
    pub timestamp: u64,
}

impl HttpRequest {
    /// Create a new HTTP request without headers or body
    pub fn new(method: String, uri: String, request_id: String, timestamp: u64) -> Self {
        Self {
            request_id,
            method,
            uri,
            headers: HashMap::new(),
            body: String::new(),
            timestamp,
        }
    }

    /// Decode the Base64 body
    pub fn body_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_body(&self.body)
    }
}
