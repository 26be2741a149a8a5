//! # eventlink auth
//!
//! Turns the process's ambient cloud identity into bearer tokens a
//! message broker accepts through SASL OAUTHBEARER.
//!
//! The crate provides:
//!
//! * [`CredentialTokenProvider`] — owns one credential, refreshes it when
//!   stale and issues `(token, expiry)` grants; its
//!   [`callback`](CredentialTokenProvider::callback) is what the broker
//!   client calls.
//! * [`CredentialSource`] — the identity-provider seam, with
//!   [`AmbientSource`] discovering service-account keys or the metadata
//!   server.
//! * [`token`] — bearer-token assembly (`header.claims.secret`, unpadded
//!   base64url segments).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use eventlink_auth::{AmbientSource, CredentialTokenProvider};
//!
//! # fn run() -> Result<(), eventlink_auth::TokenError> {
//! let provider = Arc::new(CredentialTokenProvider::new(AmbientSource::discover()?));
//! let callback = provider.callback();
//! let (token, expires_at): (String, f64) = callback()?.into();
//! # let _ = (token, expires_at);
//! # Ok(())
//! # }
//! ```

pub mod credential;
pub mod error;
pub mod provider;
pub mod source;
pub mod token;

pub use credential::Credential;
pub use error::{CredentialRefreshError, TokenError};
pub use provider::{CredentialTokenProvider, TokenCallback};
pub use source::{AmbientSource, CredentialSource, MetadataSource, ServiceAccountSource};
pub use token::{Claims, TokenGrant};
