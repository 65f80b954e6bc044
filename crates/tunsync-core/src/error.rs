//! Error types for the reconciliation system
//!
//! The taxonomy separates fatal startup failures (configuration and tunnel
//! provisioning) from transport failures, which only ever abort a single
//! operation or a single pass.

use thiserror::Error;

/// Result type alias for tunsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the reconciliation system
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tunnel id or token could not be obtained
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// A remote call failed (network failure, non-2xx, or unsuccessful envelope)
    #[error("Transport error ({service}): {message}")]
    Transport {
        /// Remote service that failed (e.g. "cloudflare", "inventory")
        service: String,
        /// Error message
        message: String,
    },

    /// Remote resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provisioning error
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    /// Create a transport error for the given remote service
    pub fn transport(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error must terminate the process at startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Provisioning(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::config("DOMAIN not set").is_fatal());
        assert!(Error::provisioning("no token").is_fatal());
        assert!(!Error::transport("cloudflare", "502").is_fatal());
        assert!(!Error::not_found("record").is_fatal());
    }

    #[test]
    fn test_transport_display_names_service() {
        let err = Error::transport("inventory", "connection refused");
        assert_eq!(
            err.to_string(),
            "Transport error (inventory): connection refused"
        );
    }
}
