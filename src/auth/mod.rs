//! Upstream credentials
//!
//! - [`CredentialProvider`]: capability that mints a bearer [`Credential`]
//! - [`TokenCache`]: caches the credential and coalesces refreshes
//! - [`ApplicationDefaultCredentials`]: Google ADC provider used in production

mod adc;
mod cache;
mod credential;

pub use adc::{
    ApplicationDefaultCredentials, AuthorizedUser, CredentialsFile, GOOGLE_TOKEN_URI,
    ServiceAccountKey, parse_credentials_file,
};
pub use cache::{DEFAULT_REFRESH_MARGIN, TokenCache};
pub use credential::{Credential, CredentialProvider};
