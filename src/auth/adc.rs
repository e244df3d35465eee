//! Google Application Default Credentials
//!
//! Looks for credentials in the usual order on every fetch:
//!
//! 1. the JSON file named by `GOOGLE_APPLICATION_CREDENTIALS`
//! 2. gcloud's well-known `application_default_credentials.json`
//! 3. the GCE / Cloud Run metadata server
//!
//! Service-account keys are exchanged through a signed JWT assertion,
//! `gcloud auth application-default login` files through their refresh token.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::credential::{Credential, CredentialProvider, TokenResponse};
use crate::{Error, Result};

/// Google OAuth2 token endpoint
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Credentials file contents, keyed by its `type` field
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsFile {
    /// Service-account key downloaded from IAM
    ServiceAccount(ServiceAccountKey),
    /// User credentials from `gcloud auth application-default login`
    AuthorizedUser(AuthorizedUser),
}

/// Service-account key file
#[derive(Debug, Deserialize)]
pub struct ServiceAccountKey {
    /// Account e-mail, used as JWT issuer
    pub client_email: String,
    /// PEM-encoded RSA private key
    pub private_key: String,
    /// Key ID, sent as the JWT `kid`
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// Token endpoint
    #[serde(default)]
    pub token_uri: Option<String>,
}

/// Authorized-user file
#[derive(Debug, Deserialize)]
pub struct AuthorizedUser {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Long-lived refresh token
    pub refresh_token: String,
    /// Token endpoint
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Where credentials are looked up
#[derive(Debug, Clone)]
enum Lookup {
    /// Environment variable, well-known file, metadata server
    Standard,
    /// A fixed credentials file
    File(PathBuf),
    /// Metadata server only
    Metadata,
}

enum Source {
    File(PathBuf),
    Metadata,
}

/// [`CredentialProvider`] backed by Google Application Default Credentials
pub struct ApplicationDefaultCredentials {
    /// HTTP client for token requests
    http: Client,
    /// Lookup strategy
    lookup: Lookup,
    /// Metadata server host (and optional port)
    metadata_host: String,
}

impl ApplicationDefaultCredentials {
    /// Standard ADC lookup
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build token client: {e}")))?;

        let metadata_host = env::var(METADATA_HOST_ENV)
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());

        Ok(Self {
            http,
            lookup: Lookup::Standard,
            metadata_host,
        })
    }

    /// Always read credentials from `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            lookup: Lookup::File(path.into()),
            ..Self::new()?
        })
    }

    /// Only ask the metadata server
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn metadata_server() -> Result<Self> {
        Ok(Self {
            lookup: Lookup::Metadata,
            ..Self::new()?
        })
    }

    /// Override the metadata server host
    #[must_use]
    pub fn with_metadata_host(mut self, host: impl Into<String>) -> Self {
        self.metadata_host = host.into();
        self
    }

    fn locate(&self) -> Source {
        match &self.lookup {
            Lookup::File(path) => Source::File(path.clone()),
            Lookup::Metadata => Source::Metadata,
            Lookup::Standard => {
                if let Some(path) = env::var_os(CREDENTIALS_ENV).filter(|p| !p.is_empty()) {
                    return Source::File(PathBuf::from(path));
                }
                match well_known_path() {
                    Some(path) if path.exists() => Source::File(path),
                    _ => Source::Metadata,
                }
            }
        }
    }

    async fn token_from_file(&self, path: &Path, scopes: &[String]) -> Result<Credential> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Credential(format!(
                "Failed to read credentials file {}: {e}",
                path.display()
            ))
        })?;
        match parse_credentials_file(&raw, path)? {
            CredentialsFile::ServiceAccount(key) => {
                debug!(account = %key.client_email, "Using service-account credentials");
                self.service_account_token(&key, scopes).await
            }
            CredentialsFile::AuthorizedUser(user) => {
                debug!("Using authorized-user credentials");
                self.authorized_user_token(&user).await
            }
        }
    }

    async fn service_account_token(
        &self,
        key: &ServiceAccountKey,
        scopes: &[String],
    ) -> Result<Credential> {
        let token_uri = key.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_URI);
        let assertion = sign_assertion(key, token_uri, scopes, Utc::now().timestamp())?;
        let request = self
            .http
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())]);
        self.exchange(request, "service-account").await
    }

    async fn authorized_user_token(&self, user: &AuthorizedUser) -> Result<Credential> {
        let token_uri = user.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_URI);
        let request = self.http.post(token_uri).form(&[
            ("grant_type", "refresh_token"),
            ("client_id", user.client_id.as_str()),
            ("client_secret", user.client_secret.as_str()),
            ("refresh_token", user.refresh_token.as_str()),
        ]);
        self.exchange(request, "authorized-user").await
    }

    async fn metadata_token(&self, scopes: &[String]) -> Result<Credential> {
        let url = format!(
            "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
            self.metadata_host
        );
        let request = self
            .http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .query(&[("scopes", scopes.join(","))]);
        self.exchange(request, "metadata-server").await
    }

    async fn exchange(&self, request: RequestBuilder, source: &str) -> Result<Credential> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Credential(format!("{source} token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Credential(format!(
                "{source} token request failed: HTTP {status} - {body}"
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            Error::Credential(format!("Failed to parse {source} token response: {e}"))
        })?;

        let credential = token.into_credential();
        info!(source = %source, expires_at = %credential.expiry, "Obtained access token");
        Ok(credential)
    }
}

#[async_trait]
impl CredentialProvider for ApplicationDefaultCredentials {
    async fn fetch(&self, scopes: &[String]) -> Result<Credential> {
        match self.locate() {
            Source::File(path) => self.token_from_file(&path, scopes).await,
            Source::Metadata => {
                debug!(host = %self.metadata_host, "Using metadata-server credentials");
                self.metadata_token(scopes).await
            }
        }
    }
}

/// Parse an ADC JSON file read from `origin`
///
/// # Errors
///
/// Returns [`Error::Credential`] naming `origin` for malformed JSON or
/// unsupported `type` values.
pub fn parse_credentials_file(raw: &str, origin: &Path) -> Result<CredentialsFile> {
    serde_json::from_str(raw).map_err(|e| {
        Error::Credential(format!(
            "Unsupported or malformed credentials file {}: {e}",
            origin.display()
        ))
    })
}

fn sign_assertion(
    key: &ServiceAccountKey,
    token_uri: &str,
    scopes: &[String],
    issued_at: i64,
) -> Result<String> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: scopes.join(" "),
        aud: token_uri,
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid.clone_from(&key.private_key_id);
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
    Ok(jsonwebtoken::encode(&header, &claims, &encoding_key)?)
}

/// gcloud's well-known ADC location
#[cfg(not(target_os = "windows"))]
fn well_known_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".config")
            .join("gcloud")
            .join("application_default_credentials.json")
    })
}

/// gcloud's well-known ADC location
#[cfg(target_os = "windows")]
fn well_known_path() -> Option<PathBuf> {
    dirs::config_dir().map(|appdata| {
        appdata
            .join("gcloud")
            .join("application_default_credentials.json")
    })
}
