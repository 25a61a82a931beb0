//! Error types for the random provider.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while handling a provider operation.
///
/// These are reported back to the host as diagnostics, except for malformed
/// requests which are rejected with a gRPC status.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Invalid request from the host (e.g. a malformed import id).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Unimplemented(msg) => tonic::Status::unimplemented(msg),
            ProviderError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
        }
    }
}

/// Errors raised while starting, announcing or tearing down the plugin server.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Binding the listener or writing the handshake failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The gRPC transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The process was started directly instead of by the host.
    #[error("plugin was not launched by the host (magic cookie mismatch)")]
    NotLaunchedByHost,

    /// No port in the configured range could be bound.
    #[error("no free port in range {min}-{max}")]
    NoFreePort {
        /// Lower bound of the range.
        min: u16,
        /// Upper bound of the range.
        max: u16,
    },

    /// The reattach descriptor could not be serialized.
    #[error("failed to marshal reattach config: {0}")]
    ReattachMarshal(#[from] serde_json::Error),

    /// The server did not publish its reattach config in time.
    #[error("timeout waiting on reattach config")]
    ReattachTimeout(Duration),

    /// The server stopped before publishing its reattach config.
    #[error("nil reattach config received")]
    NilReattachConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::Validation("length must be at least 1".to_string());
        assert_eq!(
            format!("{}", err),
            "Validation error: length must be at least 1"
        );

        let err = ProviderError::UnknownResource("random_pet".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: random_pet");
    }

    #[test]
    fn test_error_to_status() {
        let err = ProviderError::Validation("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let err = ProviderError::UnknownResource("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let err = ProviderError::Unimplemented("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::Unimplemented);

        let err = ProviderError::InvalidRequest("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn test_serialization_error_maps_to_invalid_argument() {
        let err: ProviderError = serde_json::from_slice::<serde_json::Value>(b"{not json")
            .unwrap_err()
            .into();
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().starts_with("Serialization error"));
    }

    #[test]
    fn test_serve_error_messages() {
        assert_eq!(
            ServeError::NilReattachConfig.to_string(),
            "nil reattach config received"
        );
        assert_eq!(
            ServeError::ReattachTimeout(Duration::from_secs(2)).to_string(),
            "timeout waiting on reattach config"
        );
        assert_eq!(
            ServeError::NoFreePort { min: 10, max: 20 }.to_string(),
            "no free port in range 10-20"
        );
    }
}
