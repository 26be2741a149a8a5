//! Error types for token provisioning.
//!
//! [`CredentialRefreshError`] covers everything that can go wrong while
//! talking to the identity provider.  [`TokenError`] is the single error
//! returned by the token callback; it wraps refresh failures together with
//! the local token-assembly failures.

/// The identity provider could not supply fresh access material.
///
/// Never retried inside this crate: retry policy belongs to whoever invoked
/// the token callback (usually the broker client's reconnect loop).
#[derive(Debug, thiserror::Error)]
pub enum CredentialRefreshError {
    /// The HTTP call to the identity provider failed at the transport level.
    #[error("failed to reach identity provider: {0}")]
    Http(#[from] reqwest::Error),

    /// The identity provider answered but refused the refresh
    /// (revoked identity, wrong scopes, misconfigured account…).
    #[error("identity provider rejected refresh ({status}): {body}")]
    Rejected {
        /// HTTP status returned by the provider.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The provider's response could not be interpreted.
    #[error("malformed identity provider response: {0}")]
    MalformedResponse(String),

    /// The refreshed access material was already expired when it arrived.
    #[error("refreshed credential for {principal} is already expired")]
    ExpiredOnArrival {
        /// Principal of the refreshed credential.
        principal: String,
    },

    /// A service-account key could not be used to sign an assertion.
    #[error("invalid service account key: {0}")]
    InvalidKey(String),

    /// No ambient credential could be located.
    #[error("could not discover ambient credentials: {0}")]
    Discovery(String),
}

/// Failure of [`get_token_and_expiry`](crate::CredentialTokenProvider::get_token_and_expiry).
///
/// Any step of the token flow failing surfaces as exactly one of these; a
/// partially built token is never returned.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The credential could not be refreshed.
    #[error(transparent)]
    Refresh(#[from] CredentialRefreshError),

    /// A token was requested from a credential without usable access material.
    #[error("credential for {principal} holds no usable access material")]
    StaleCredential {
        /// Principal of the offending credential.
        principal: String,
    },

    /// The token claims could not be serialized.
    #[error("failed to encode token claims: {0}")]
    Encoding(#[from] serde_json::Error),
}
