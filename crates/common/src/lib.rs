//! Common utilities and types for ollama-bridge
//!
//! This crate provides the shared data structures, the managed tunnel wire
//! protocol, and utilities used by the bridge binary.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod utils;
pub mod validation;

// Re-export commonly used types for convenience
pub use error::TunnelError;
pub use models::{Session, TunnelEvent};
pub use protocol::{ErrorCode, HttpRequest, HttpResponse, Message, RelayAssignment};
pub use utils::{
    current_timestamp_secs, decode_body, encode_body, headers_to_map,
    issue_secret_token, map_to_headers, strip_matching_headers,
};
