use serde::{Deserialize, Serialize};

use super::{HttpRequest, HttpResponse};
use crate::utils::encode_body;

/// Every managed tunnel WebSocket message is wrapped in this typed envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Control plane messages
    Ping,
    Pong,
    Ready, // Sent by the bridge after connecting to request a public endpoint

    /// Tunnel lifecycle
    ConnectionEstablished {
        connection_id: String,
        tunnel_id: String,
        public_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        hostname: Option<String>,
    },
    TunnelClosed {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Data plane messages
    HttpRequest(HttpRequest),
    HttpResponse(HttpResponse),
    HttpResponseChunk {
        request_id: String,
        /// Base64 encoded slice of the response body
        body: String,
    },
    HttpResponseEnd {
        request_id: String,
        /// Time until the local listener finished the body, in milliseconds
        processing_time_ms: u64,
    },

    /// Error handling
    Error {
        request_id: Option<String>,
        code: ErrorCode,
        message: String,
    },
}

impl Message {
    /// Build an error reply for a request the bridge could not serve
    pub fn request_error(request_id: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        Message::Error {
            request_id: Some(request_id.to_string()),
            code,
            message: message.into(),
        }
    }

    /// Build the next slice of a streamed response body
    pub fn response_chunk(request_id: &str, body: &[u8]) -> Self {
        Message::HttpResponseChunk {
            request_id: request_id.to_string(),
            body: encode_body(body),
        }
    }

    /// Build the terminator of a streamed response
    pub fn response_end(request_id: &str, processing_time_ms: u64) -> Self {
        Message::HttpResponseEnd {
            request_id: request_id.to_string(),
            processing_time_ms,
        }
    }
}

/// Error codes for managed tunnel operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    Unauthorized,
    DomainUnavailable,
    Timeout,
    LocalServiceUnavailable,
    InternalError,
}
