//! Token cache with coalesced refresh
//!
//! Readers share a read lock while the cached credential is fresh. A refresh
//! holds the write lock for the whole provider call, so callers arriving during
//! a refresh queue behind it and pick up its result instead of fetching again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::credential::{Credential, CredentialProvider};
use crate::{Error, Result};

/// Default safety margin before expiry
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Caches the provider's credential and refreshes it before it expires
pub struct TokenCache {
    /// Credential source
    provider: Arc<dyn CredentialProvider>,
    /// Scopes passed on every fetch
    scopes: Vec<String>,
    /// Tokens closer than this to expiry are refreshed
    refresh_margin: Duration,
    /// Current credential; `None` until the first successful fetch
    state: RwLock<Option<Credential>>,
}

impl TokenCache {
    /// Create an empty cache over `provider`
    pub fn new(provider: Arc<dyn CredentialProvider>, scopes: Vec<String>) -> Self {
        Self {
            provider,
            scopes,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            state: RwLock::new(None),
        }
    }

    /// Override the safety margin
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Get a valid access token, fetching a new credential when needed
    ///
    /// # Errors
    ///
    /// Returns the provider's error when a fetch was needed and failed. The
    /// cached state is left as it was.
    pub async fn token(&self) -> Result<String> {
        {
            let state = self.state.read().await;
            if let Some(cred) = self.fresh((*state).as_ref()) {
                debug!("Using cached token");
                return Ok(cred.access_token.clone());
            }
        }

        let mut state = self.state.write().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(cred) = self.fresh((*state).as_ref()) {
            debug!("Using token refreshed by a concurrent caller");
            return Ok(cred.access_token.clone());
        }

        info!("Cache expired or empty, fetching new token");
        let credential = match self.provider.fetch(&self.scopes).await {
            Ok(credential) => credential,
            Err(e) => {
                error!(error = %e, "Failed to fetch credential");
                return Err(e);
            }
        };

        let token = credential.access_token.clone();
        info!(expires_at = %credential.expiry, "Fetched new token");
        *state = Some(credential);
        Ok(token)
    }

    /// Like [`Self::token`], bounded by the caller's deadline
    ///
    /// Fails immediately when `deadline` has already passed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the deadline passes first, otherwise
    /// whatever [`Self::token`] returns.
    pub async fn token_before(&self, deadline: Instant) -> Result<String> {
        if Instant::now() >= deadline {
            return Err(Error::Timeout(
                "request deadline passed before token fetch".to_string(),
            ));
        }
        tokio::time::timeout_at(deadline, self.token())
            .await
            .map_err(|_| Error::Timeout("token fetch did not finish before deadline".to_string()))?
    }

    /// Copy of the cached credential, if any
    pub async fn cached(&self) -> Option<Credential> {
        self.state.read().await.clone()
    }

    fn fresh<'a>(&self, cached: Option<&'a Credential>) -> Option<&'a Credential> {
        cached.filter(|c| c.is_fresh_at(Utc::now(), self.refresh_margin))
    }
}
