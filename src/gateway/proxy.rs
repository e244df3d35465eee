//! Forwarding unit: rewriter → upstream → inspector

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{Response, StatusCode, header};
use reqwest::Client;
use tokio::time::Instant;
use tracing::error;

use super::inspect::ResponseInspector;
use super::rewrite::{ForwardBody, ForwardedRequest, RequestRewriter};
use super::target::ProxyTarget;
use crate::auth::TokenCache;
use crate::config::ServerConfig;
use crate::{Error, Result};

/// Prefix of the synthetic 502 body
pub const PROXY_ERROR_PREFIX: &str = "Proxy error connecting to upstream service";

/// Forwards inbound requests to the Vertex AI endpoint
pub struct ProxyCore {
    client: Client,
    rewriter: RequestRewriter,
    inspector: ResponseInspector,
    request_timeout: Duration,
}

impl ProxyCore {
    /// Create a proxy for `target`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(target: ProxyTarget, tokens: Arc<TokenCache>, server: &ServerConfig) -> Result<Self> {
        // Bytes and statuses must reach the client exactly as the upstream sent them.
        let client = Client::builder()
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create upstream HTTP client: {e}")))?;

        Ok(Self {
            client,
            rewriter: RequestRewriter::new(target, tokens),
            inspector: ResponseInspector,
            request_timeout: server.request_timeout,
        })
    }

    /// Upstream target
    pub fn target(&self) -> &ProxyTarget {
        self.rewriter.target()
    }

    /// Forward one request and produce the client response
    ///
    /// Only a forwarding failure produces a locally generated response (502).
    pub async fn forward(&self, request: Request, client_addr: Option<IpAddr>) -> Response<Body> {
        let deadline = Instant::now() + self.request_timeout;
        let forwarded = self.rewriter.rewrite(request, client_addr, deadline).await;
        let method = forwarded.method.clone();
        let url = forwarded.url.clone();

        match self.send(forwarded, deadline).await {
            Ok(upstream) => self.inspector.inspect(&method, &url, upstream).await,
            Err(e) => {
                error!(method = %method, target_url = %url, error = %e, "HTTP proxy error");
                proxy_error(&e)
            }
        }
    }

    async fn send(&self, forwarded: ForwardedRequest, deadline: Instant) -> Result<reqwest::Response> {
        if Instant::now() >= deadline {
            return Err(Error::Timeout("request deadline passed before forwarding".to_string()));
        }

        let mut builder = self
            .client
            .request(forwarded.method, forwarded.url)
            .headers(forwarded.headers);
        builder = match forwarded.body {
            ForwardBody::Empty => builder,
            ForwardBody::Buffered(bytes) => builder.body(bytes),
            ForwardBody::Streaming(body) => {
                builder.body(reqwest::Body::wrap_stream(body.into_data_stream()))
            }
        };

        let response = tokio::time::timeout_at(deadline, builder.send())
            .await
            .map_err(|_| Error::Timeout("no upstream response before deadline".to_string()))??;
        Ok(response)
    }
}

fn proxy_error(err: &Error) -> Response<Body> {
    let mut response = Response::new(Body::from(format!("{PROXY_ERROR_PREFIX}: {err}")));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
