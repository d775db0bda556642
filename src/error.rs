// src/error.rs

//! Unified error handling for the crawler core.
//!
//! Admission refusals are not errors: the frontier answers them with `false`.
//! Everything that can go wrong while talking to a peer or touching the disk
//! lands in [`AppError`], and the caller decides whether to retry.

use std::fmt;

use thiserror::Error;

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Peer failed authentication or the exchange was out of order
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Socket, DNS or security layer failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Frame or message could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Durable write or replay failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Command is not allowed in the current mode
    #[error("Policy error: {0}")]
    Policy(String),

    /// Illegal lifecycle transition
    #[error("Invalid state: {0}")]
    State(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// TLS layer failed
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// HTTP request failed
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a handshake error.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake(message.into())
    }

    /// Create a transport error from anything printable.
    pub fn transport(message: impl fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a persistence error from anything printable.
    pub fn persistence(message: impl fmt::Display) -> Self {
        Self::Persistence(message.to_string())
    }

    /// Create a policy error.
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy(message.into())
    }

    /// Create an invalid state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Whether the failure came from the network path and should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Handshake(_) | Self::Protocol(_) | Self::Io(_) | Self::Tls(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_retryable() {
        assert!(AppError::transport("connection refused").is_retryable());
        assert!(AppError::handshake("bad password").is_retryable());
        assert!(AppError::protocol("truncated frame").is_retryable());
    }

    #[test]
    fn test_local_errors_are_not_retryable() {
        assert!(!AppError::config("bad ip").is_retryable());
        assert!(!AppError::policy("host sourced").is_retryable());
        assert!(!AppError::state("already running").is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = AppError::policy("Can not clear cache when using Host as Url source!");
        assert_eq!(
            err.to_string(),
            "Policy error: Can not clear cache when using Host as Url source!"
        );
    }
}
