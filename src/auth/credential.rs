//! Credentials and the capability that produces them

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

use crate::Result;

/// Short-lived bearer credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Bearer token sent upstream
    pub access_token: String,
    /// Instant after which the token is no longer accepted
    pub expiry: DateTime<Utc>,
}

impl Credential {
    /// Create a credential
    pub fn new(access_token: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expiry,
        }
    }

    /// Whether the credential stays valid for longer than `margin` after `now`
    pub fn is_fresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = TimeDelta::from_std(margin).unwrap_or(TimeDelta::MAX);
        match self.expiry.checked_sub_signed(margin) {
            Some(refresh_at) => now < refresh_at,
            None => false,
        }
    }

    /// Time left before expiry, `None` once expired
    pub fn time_until_expiry(&self) -> Option<Duration> {
        (self.expiry - Utc::now()).to_std().ok()
    }
}

/// Source of bearer credentials
///
/// Implementations talk to an identity service. Every failure is reported the
/// same way; the cache above decides what to do with it.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch a new credential for `scopes`
    async fn fetch(&self, scopes: &[String]) -> Result<Credential>;
}

/// OAuth2 token endpoint response
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Convert into a credential, counting `expires_in` from now
    pub(crate) fn into_credential(self) -> Credential {
        // Google always sends expires_in; assume the usual hour when it doesn't.
        let lifetime = TimeDelta::seconds(self.expires_in.unwrap_or(3600));
        Credential::new(self.access_token, Utc::now() + lifetime)
    }
}
