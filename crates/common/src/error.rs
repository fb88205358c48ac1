use std::time::Duration;

use thiserror::Error;

use crate::validation::ValidationError;

/// Error types for opening and running a public tunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Tunnel provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("Missing tunnel credential: {0}")]
    MissingCredential(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timed out after {0:?} waiting for the tunnel provider")]
    Timeout(Duration),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Invalid tunnel configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunnelError::ProviderRejected("subdomain is taken".to_string());
        assert_eq!(
            err.to_string(),
            "Tunnel provider rejected the request: subdomain is taken"
        );

        let err = TunnelError::Timeout(Duration::from_secs(10));
        assert_eq!(
            err.to_string(),
            "Timed out after 10s waiting for the tunnel provider"
        );
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_err.is_err());

        let tunnel_err: TunnelError = json_err.unwrap_err().into();
        assert!(matches!(tunnel_err, TunnelError::SerializationError(_)));
    }

    #[test]
    fn test_validation_error_conversion() {
        let err: TunnelError = ValidationError::InvalidSubdomain("A!".to_string()).into();
        assert!(matches!(err, TunnelError::InvalidConfig(_)));
        assert!(err.to_string().contains("A!"));
    }
}
