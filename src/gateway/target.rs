//! Upstream resource root

use url::Url;

use crate::{Error, Result};

/// Immutable base URL every request is forwarded under
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    url: Url,
    path: String,
}

impl ProxyTarget {
    /// Build a target from its base URL
    ///
    /// A trailing `/` on the path is dropped so that appending `/chat/completions`
    /// never produces `//`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the URL is `http`/`https` with a host.
    pub fn new(url: Url) -> Result<Self> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Unsupported target scheme '{}' in {url}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::Config(format!("Target URL has no host: {url}")));
        }
        let path = url.path().trim_end_matches('/').to_string();
        Ok(Self { url, path })
    }

    /// Target scheme
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Value for the outbound `Host` header (`host[:port]`)
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Path prefix of the upstream resource
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Base URL as configured
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Upstream URL for an already rewritten path
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.url.clone();
        url.set_path(path);
        url.set_query(query);
        url.set_fragment(None);
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(raw: &str) -> ProxyTarget {
        ProxyTarget::new(Url::parse(raw).unwrap()).unwrap()
    }

    #[test]
    fn authority_omits_default_port() {
        let t = target("https://us-central1-aiplatform.googleapis.com/v1/projects/p/locations/l/endpoints/openapi");
        assert_eq!(t.scheme(), "https");
        assert_eq!(t.authority(), "us-central1-aiplatform.googleapis.com");
        assert_eq!(t.path(), "/v1/projects/p/locations/l/endpoints/openapi");
    }

    #[test]
    fn authority_keeps_explicit_port() {
        let t = target("http://127.0.0.1:8181/base");
        assert_eq!(t.authority(), "127.0.0.1:8181");
    }

    #[test]
    fn trailing_slash_is_dropped() {
        let t = target("http://upstream.test/root/");
        assert_eq!(t.path(), "/root");
    }

    #[test]
    fn upstream_url_sets_path_and_query() {
        let t = target("http://upstream.test/root");
        let url = t.upstream_url("/root/chat/completions", Some("alt=sse"));
        assert_eq!(url.as_str(), "http://upstream.test/root/chat/completions?alt=sse");
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = ProxyTarget::new(Url::parse("ftp://files.test/x").unwrap()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
