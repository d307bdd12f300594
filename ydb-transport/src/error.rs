//! Error types for the transport

use thiserror::Error;
use tonic::Code;

/// Transport error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Request was not sent: transport is shutting down")]
    ShuttingDown,

    #[error("Request was not sent: transport is not ready")]
    NotReady,

    #[error("No endpoints available")]
    NoEndpoints,

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// gRPC status code equivalent of this error
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::ShuttingDown => Code::Cancelled,
            Self::NotReady | Self::Timeout(_) => Code::DeadlineExceeded,
            Self::NoEndpoints | Self::Discovery(_) => Code::Unavailable,
            Self::Rpc(status) => status.code(),
            Self::Configuration(_) => Code::InvalidArgument,
            Self::Io(_) => Code::Internal,
        }
    }

    /// Whether the caller may retry the same request with a fresh deadline
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotReady | Self::NoEndpoints | Self::Timeout(_) => true,
            Self::Rpc(status) => matches!(
                status.code(),
                Code::Unavailable | Code::DeadlineExceeded | Code::ResourceExhausted
            ),
            _ => false,
        }
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Rpc(status) => status,
            other => Self::new(other.code(), other.to_string()),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;
