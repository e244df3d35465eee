//! Inbound request → upstream request

use std::net::IpAddr;
use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, Method, header};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

use super::headers::{append_forwarded_for, strip_hop_by_hop};
use super::target::ProxyTarget;
use crate::auth::TokenCache;

/// Routing prefix handled by the proxy
pub const ROUTE_PREFIX: &str = "/v1/";

/// Path whose body is buffered before forwarding
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Map an inbound path onto the target path
///
/// `/v1/<rest>` becomes `<target>/<rest>`. Anything else is appended to the
/// target path as-is.
pub fn rewrite_path(target_path: &str, inbound: &str) -> String {
    if let Some(rest) = inbound.strip_prefix(ROUTE_PREFIX) {
        let rewritten = format!("{target_path}/{rest}");
        debug!(original_path = inbound, new_path = %rewritten, "Rewriting path");
        rewritten
    } else {
        warn!(path = inbound, "Path does not start with {ROUTE_PREFIX}");
        format!("{target_path}{inbound}")
    }
}

/// Body of a forwarded request
#[derive(Debug)]
pub enum ForwardBody {
    /// Inbound request had no body
    Empty,
    /// Fully read into memory
    Buffered(Bytes),
    /// Streamed through as it arrives
    Streaming(Body),
}

/// Request ready to be sent upstream
#[derive(Debug)]
pub struct ForwardedRequest {
    /// HTTP method, unchanged
    pub method: Method,
    /// Full upstream URL
    pub url: Url,
    /// Outbound headers
    pub headers: HeaderMap,
    /// Outbound body
    pub body: ForwardBody,
}

/// Turns inbound requests into [`ForwardedRequest`]s against one target
pub struct RequestRewriter {
    target: ProxyTarget,
    tokens: Arc<TokenCache>,
}

impl RequestRewriter {
    /// Create a rewriter for `target`
    pub fn new(target: ProxyTarget, tokens: Arc<TokenCache>) -> Self {
        Self { target, tokens }
    }

    /// The target requests are rewritten against
    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }

    /// Rewrite `request` for the upstream
    ///
    /// Never fails: a body read error forwards what was read and a token error
    /// forwards without `Authorization`.
    pub async fn rewrite(
        &self,
        request: Request,
        client: Option<IpAddr>,
        deadline: Instant,
    ) -> ForwardedRequest {
        let (parts, body) = request.into_parts();
        let original_path = parts.uri.path().to_string();
        debug!(method = %parts.method, path = %original_path, ?client, "Processing request");

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::AUTHORIZATION);
        if let Some(ip) = client {
            append_forwarded_for(&mut headers, ip);
        }
        if let Ok(host) = HeaderValue::from_str(&self.target.authority()) {
            headers.insert(header::HOST, host);
        }

        let body = if original_path == CHAT_COMPLETIONS_PATH {
            let bytes = Self::read_body(body, &original_path).await;
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            debug!(path = %original_path, content_length = bytes.len(), "Passing buffered request body");
            ForwardBody::Buffered(bytes)
        } else if body.is_end_stream() {
            ForwardBody::Empty
        } else {
            ForwardBody::Streaming(body)
        };

        let path = rewrite_path(self.target.path(), &original_path);
        let url = self.target.upstream_url(&path, parts.uri.query());

        match self.tokens.token_before(deadline).await {
            Ok(token) => match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(header::AUTHORIZATION, value);
                    debug!(path = %path, "Authorization header set");
                }
                Err(e) => error!(path = %original_path, error = %e, "Token is not a valid header value"),
            },
            Err(e) => {
                error!(path = %original_path, error = %e, "Error getting token for request");
            }
        }

        debug!(method = %parts.method, url = %url, "Forwarding request");
        ForwardedRequest {
            method: parts.method,
            url,
            headers,
            body,
        }
    }

    /// Read the whole body, keeping whatever arrived before an error
    async fn read_body(body: Body, path: &str) -> Bytes {
        let mut stream = body.into_data_stream();
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => buf.extend_from_slice(&chunk),
                Err(e) => {
                    error!(path, error = %e, read = buf.len(), "Error reading request body");
                    break;
                }
            }
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};

    use crate::auth::{Credential, CredentialProvider};
    use crate::{Error, Result};

    const TARGET: &str = "https://europe-west4-aiplatform.googleapis.com/v1/projects/p/locations/europe-west4/endpoints/openapi";

    struct StaticProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for StaticProvider {
        async fn fetch(&self, _scopes: &[String]) -> Result<Credential> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Credential::new("ya29.test", Utc::now() + TimeDelta::hours(1)))
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl CredentialProvider for BrokenProvider {
        async fn fetch(&self, _scopes: &[String]) -> Result<Credential> {
            Err(Error::Credential("no credentials found".to_string()))
        }
    }

    fn rewriter(provider: Arc<dyn CredentialProvider>) -> RequestRewriter {
        let target = ProxyTarget::new(Url::parse(TARGET).unwrap()).unwrap();
        let tokens = Arc::new(TokenCache::new(provider, vec!["scope".to_string()]));
        RequestRewriter::new(target, tokens)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    async fn read_all(body: ForwardBody) -> Bytes {
        match body {
            ForwardBody::Empty => Bytes::new(),
            ForwardBody::Buffered(bytes) => bytes,
            ForwardBody::Streaming(body) => axum::body::to_bytes(body, usize::MAX).await.unwrap(),
        }
    }

    #[test]
    fn rewrite_path_strips_route_prefix() {
        assert_eq!(
            rewrite_path("/base/openapi", "/v1/chat/completions"),
            "/base/openapi/chat/completions"
        );
        assert_eq!(rewrite_path("/base/openapi", "/v1/models"), "/base/openapi/models");
        assert_eq!(rewrite_path("/base/openapi", "/v1/"), "/base/openapi/");
    }

    #[test]
    fn rewrite_path_passes_unexpected_paths_through() {
        assert_eq!(rewrite_path("/base", "/unexpected"), "/base/unexpected");
        assert_eq!(rewrite_path("/base", "/v1"), "/base/v1");
        assert_eq!(rewrite_path("/base", "relative"), "/baserelative");
    }

    #[tokio::test]
    async fn chat_completions_body_is_buffered_verbatim() {
        let provider = Arc::new(StaticProvider {
            calls: AtomicUsize::new(0),
        });
        let rw = rewriter(provider);
        let payload = r#"{"model":"google/gemini-2.5-pro","messages":[{"role":"user","content":"hi"}]}"#;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/chat/completions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .unwrap();

        let fwd = rw.rewrite(request, None, deadline()).await;

        assert_eq!(
            fwd.url.path(),
            "/v1/projects/p/locations/europe-west4/endpoints/openapi/chat/completions"
        );
        assert_eq!(fwd.headers[header::CONTENT_LENGTH], payload.len().to_string().as_str());
        assert_eq!(fwd.headers[header::CONTENT_TYPE], "application/json");
        assert!(matches!(fwd.body, ForwardBody::Buffered(_)));
        assert_eq!(read_all(fwd.body).await, Bytes::from(payload));
    }

    #[tokio::test]
    async fn other_paths_keep_query_and_stream_body() {
        let provider = Arc::new(StaticProvider {
            calls: AtomicUsize::new(0),
        });
        let rw = rewriter(provider);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/embeddings?alt=json")
            .body(Body::from("embed me"))
            .unwrap();

        let fwd = rw.rewrite(request, None, deadline()).await;

        assert_eq!(
            fwd.url.as_str(),
            format!("{TARGET}/embeddings?alt=json")
        );
        assert!(matches!(fwd.body, ForwardBody::Streaming(_)));
        assert_eq!(read_all(fwd.body).await, Bytes::from("embed me"));
    }

    #[tokio::test]
    async fn empty_get_has_no_body() {
        let provider = Arc::new(StaticProvider {
            calls: AtomicUsize::new(0),
        });
        let rw = rewriter(provider);
        let request = Request::builder()
            .uri("/v1/models/gemini")
            .body(Body::empty())
            .unwrap();

        let fwd = rw.rewrite(request, None, deadline()).await;
        assert!(matches!(fwd.body, ForwardBody::Empty));
    }

    #[tokio::test]
    async fn sets_host_bearer_and_forwarded_for() {
        let provider = Arc::new(StaticProvider {
            calls: AtomicUsize::new(0),
        });
        let rw = rewriter(provider.clone());
        let request = Request::builder()
            .uri("/v1/models")
            .header(header::HOST, "localhost:8080")
            .header(header::AUTHORIZATION, "Bearer client-key")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::empty())
            .unwrap();

        let fwd = rw
            .rewrite(request, Some("192.0.2.10".parse().unwrap()), deadline())
            .await;

        assert_eq!(fwd.headers[header::HOST], "europe-west4-aiplatform.googleapis.com");
        assert_eq!(fwd.headers[header::AUTHORIZATION], "Bearer ya29.test");
        assert_eq!(fwd.headers["x-forwarded-for"], "192.0.2.10");
        assert!(!fwd.headers.contains_key(header::CONNECTION));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn token_failure_forwards_without_authorization() {
        let rw = rewriter(Arc::new(BrokenProvider));
        let request = Request::builder()
            .uri("/v1/models")
            .header(header::AUTHORIZATION, "Bearer client-key")
            .body(Body::empty())
            .unwrap();

        let fwd = rw.rewrite(request, None, deadline()).await;

        assert!(!fwd.headers.contains_key(header::AUTHORIZATION));
        assert_eq!(fwd.url.as_str(), format!("{TARGET}/models"));
    }

    #[tokio::test]
    async fn failed_body_read_forwards_partial_bytes() {
        let provider = Arc::new(StaticProvider {
            calls: AtomicUsize::new(0),
        });
        let rw = rewriter(provider);
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"model\":")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/chat/completions")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .unwrap();

        let fwd = rw.rewrite(request, None, deadline()).await;

        assert_eq!(fwd.headers[header::CONTENT_LENGTH], "9");
        assert_eq!(read_all(fwd.body).await, Bytes::from_static(b"{\"model\":"));
    }

    #[tokio::test]
    async fn large_chat_body_is_forwarded_whole() {
        let provider = Arc::new(StaticProvider {
            calls: AtomicUsize::new(0),
        });
        let rw = rewriter(provider);
        // 11 MiB in 64 KiB chunks, like an inline base64 image upload.
        let chunk = Bytes::from(vec![b'a'; 64 * 1024]);
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> =
            (0..176).map(|_| Ok(chunk.clone())).collect();
        let sent = 176 * 64 * 1024;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/chat/completions")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .unwrap();

        let fwd = rw.rewrite(request, None, deadline()).await;

        assert_eq!(fwd.headers[header::CONTENT_LENGTH], sent.to_string().as_str());
        let body = read_all(fwd.body).await;
        assert_eq!(body.len(), sent);
        assert!(body.iter().all(|b| *b == b'a'));
    }
}
