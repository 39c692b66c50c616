//! Error types and Result alias for the PharmaLink sync layer

use thiserror::Error;

/// Main error type for the PharmaLink client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Session token missing or expired")]
    TokenExpired,

    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a reconnect attempt may recover from this error.
    ///
    /// Auth failures are not retryable: the connection loop parks until
    /// a fresh token is observed instead of hammering the server.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NetworkError(_) | Error::TransportError(_) | Error::ConnectionClosed(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}
