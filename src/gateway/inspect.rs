//! Upstream response → client response
//!
//! Error-class bodies are buffered so they can be logged, then handed back
//! unchanged. Everything else streams.

use std::fmt::Write as _;
use std::io::Read;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Response, header};
use bytes::Bytes;
use flate2::read::GzDecoder;
use tracing::{Level, debug, enabled, error};
use url::Url;

use super::headers::strip_hop_by_hop;

/// Diagnostic rendering of an upstream error body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticBody {
    /// Body was not compressed
    Plain(String),
    /// Body was gzip and decoded cleanly
    Decompressed(String),
    /// Body claimed gzip but could not be decoded
    UndecodableGzip {
        /// Decoder error
        error: String,
        /// Raw body, lossily rendered
        raw: String,
    },
}

impl DiagnosticBody {
    /// Text that ends up in the log
    pub fn text(&self) -> &str {
        match self {
            Self::Plain(text) | Self::Decompressed(text) => text,
            Self::UndecodableGzip { raw, .. } => raw,
        }
    }
}

/// Render an error body for logging, decompressing gzip when declared
pub fn describe_body(headers: &HeaderMap, body: &[u8]) -> DiagnosticBody {
    if !is_gzip(headers) {
        return DiagnosticBody::Plain(String::from_utf8_lossy(body).into_owned());
    }
    match decode_gzip(body) {
        Ok(decoded) => DiagnosticBody::Decompressed(String::from_utf8_lossy(&decoded).into_owned()),
        Err(e) => DiagnosticBody::UndecodableGzip {
            error: e.to_string(),
            raw: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"))
}

/// Decompress a complete gzip payload
///
/// # Errors
///
/// Returns the decoder's error for truncated or malformed input.
pub fn decode_gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(body).read_to_end(&mut decoded)?;
    Ok(decoded)
}

/// Relays upstream responses and logs error bodies
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseInspector;

impl ResponseInspector {
    /// Convert an upstream response into the client response
    ///
    /// Status, headers (minus hop-by-hop) and body bytes are preserved.
    pub async fn inspect(&self, method: &Method, url: &Url, upstream: reqwest::Response) -> Response<Body> {
        let status = upstream.status();
        debug!(
            host = url.host_str().unwrap_or_default(),
            method = %method,
            path = url.path(),
            status = %status,
            "Received response from upstream"
        );

        let mut headers = upstream.headers().clone();
        if enabled!(Level::DEBUG) && !headers.is_empty() {
            debug!(headers = %format_headers(&headers), "Upstream response headers");
        }
        strip_hop_by_hop(&mut headers);

        let body = if status.as_u16() >= 400 {
            match upstream.bytes().await {
                Ok(bytes) => {
                    log_error_body(&headers, &bytes);
                    Body::from(bytes)
                }
                Err(e) => {
                    error!(status = %status, error = %e, "Error reading error response body from upstream");
                    headers.remove(header::CONTENT_LENGTH);
                    Body::from(Bytes::new())
                }
            }
        } else {
            Body::from_stream(upstream.bytes_stream())
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

fn log_error_body(headers: &HeaderMap, body: &[u8]) {
    match describe_body(headers, body) {
        DiagnosticBody::Plain(text) => {
            debug!(body = %text, "Upstream error response body");
        }
        DiagnosticBody::Decompressed(text) => {
            debug!(body = %text, "Upstream error response body (decompressed)");
        }
        DiagnosticBody::UndecodableGzip { error, raw } => {
            error!(error = %error, "Error decompressing gzip error response body, logging raw body");
            debug!(body = %raw, "Upstream error response body (raw gzipped)");
        }
    }
}

fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .map(|v| v.to_str().unwrap_or("<binary>"))
            .collect();
        let _ = write!(out, "\n  {name}: {}", values.join(", "));
    }
    out
}
