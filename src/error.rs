//! Error types for the Vertex proxy

use std::io;

use thiserror::Error;

/// Result type alias for the Vertex proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Vertex proxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential could not be obtained
    #[error("Credential error: {0}")]
    Credential(String),

    /// Request deadline passed before the operation finished
    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    /// Forwarding to the upstream failed before a response arrived
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JWT signing error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error came from the caller's deadline rather than the remote side.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_variant_is_timeout() {
        assert!(Error::Timeout("token fetch".to_string()).is_timeout());
        assert!(!Error::Credential("nope".to_string()).is_timeout());
    }

    #[test]
    fn display_includes_context() {
        let err = Error::Config("VERTEXAI_PROJECT must be set".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: VERTEXAI_PROJECT must be set"
        );
    }
}
