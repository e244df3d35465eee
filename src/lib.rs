//! Vertex AI Proxy Library
//!
//! OpenAI-compatible reverse proxy in front of Google Vertex AI.
//!
//! # Features
//!
//! - **Transparent forwarding**: `/v1/*` is rewritten onto the Vertex AI
//!   `endpoints/openapi` resource; status, headers and body bytes come back
//!   unchanged
//! - **Managed credentials**: Google Application Default Credentials, cached
//!   and refreshed ahead of expiry with a single in-flight refresh
//! - **Error diagnostics**: upstream error bodies are logged, gzip included
//! - **Model listing**: `GET /v1/models` from configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
