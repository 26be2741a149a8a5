//! The token callback: ambient credential in, broker bearer token out.
//!
//! [`CredentialTokenProvider`] owns one [`Credential`] for its whole life.
//! Each call to [`get_token_and_expiry`](CredentialTokenProvider::get_token_and_expiry)
//! refreshes that credential if it is no longer valid and assembles a fresh
//! token from it.
//!
//! The provider is meant to be called from whatever thread the broker
//! client's connection machinery runs on.  A refresh is a blocking network
//! call and stalls that thread until it completes; concurrent callers wait
//! on the same lock instead of refreshing twice.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::error::{CredentialRefreshError, TokenError};
use crate::source::CredentialSource;
use crate::token::{self, TokenGrant};

/// A registered token callback with the signature the broker client expects.
pub type TokenCallback = Arc<dyn Fn() -> Result<TokenGrant, TokenError> + Send + Sync>;

/// Issues broker bearer tokens backed by a refreshable identity credential.
///
/// # Examples
///
/// ```rust,no_run
/// use eventlink_auth::{AmbientSource, CredentialTokenProvider};
///
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = CredentialTokenProvider::new(AmbientSource::discover()?);
/// let grant = provider.get_token_and_expiry()?;
/// println!("token valid until {}", grant.expires_at);
/// # Ok(())
/// # }
/// ```
pub struct CredentialTokenProvider<S> {
    source: S,
    credential: Mutex<Credential>,
}

impl<S: CredentialSource> CredentialTokenProvider<S> {
    /// Wrap `source`, starting from its default (usually unrefreshed) credential.
    pub fn new(source: S) -> Self {
        let credential = source.default_credential();
        debug!(principal = %credential.principal(), "credential token provider created");
        Self {
            source,
            credential: Mutex::new(credential),
        }
    }

    /// Return a credential that is valid right now, refreshing it first if needed.
    ///
    /// The refresh happens at most once per call and is not retried.
    pub fn ensure_valid_credential(&self) -> Result<Credential, CredentialRefreshError> {
        let mut held = self.lock();
        if held.is_valid_at(Utc::now()) {
            return Ok(held.clone());
        }

        info!(principal = %held.principal(), "refreshing credential");
        let refreshed = self.source.refresh(&held).inspect_err(|e| {
            warn!(principal = %held.principal(), error = %e, "credential refresh failed");
        })?;

        if !refreshed.is_unexpired_at(Utc::now()) {
            return Err(CredentialRefreshError::ExpiredOnArrival {
                principal: refreshed.principal().to_string(),
            });
        }

        info!(
            principal = %refreshed.principal(),
            expiry = ?refreshed.expiry(),
            "credential refreshed"
        );
        *held = refreshed.clone();
        Ok(refreshed)
    }

    /// Produce a bearer token and its absolute expiry (Unix seconds).
    ///
    /// This is the function registered as the broker client's token
    /// callback.  The expiry is computed as `now + (credential expiry - now)`
    /// with both instants in UTC.
    pub fn get_token_and_expiry(&self) -> Result<TokenGrant, TokenError> {
        let credential = self.ensure_valid_credential()?;
        let now = Utc::now();

        let expiry = credential
            .expiry()
            .ok_or_else(|| TokenError::StaleCredential {
                principal: credential.principal().to_string(),
            })?;
        let remaining = expiry.signed_duration_since(now);

        let token = token::build_bearer_token(&credential, now)?;
        let expires_at = token::unix_seconds(now + remaining);

        debug!(
            principal = %credential.principal(),
            remaining_secs = remaining.num_seconds(),
            "bearer token issued"
        );
        Ok(TokenGrant { token, expires_at })
    }

    /// Produce a bearer token only, for clients that do not take an expiry.
    pub fn token(&self) -> Result<String, TokenError> {
        let credential = self.ensure_valid_credential()?;
        token::build_bearer_token(&credential, Utc::now())
    }

    /// Principal of the currently held credential.
    pub fn principal(&self) -> String {
        self.lock().principal().to_string()
    }

    /// The underlying credential source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Snapshot of the currently held credential, without refreshing.
    pub fn current_credential(&self) -> Credential {
        self.lock().clone()
    }

    // The credential is only ever replaced whole, so a poisoned lock still
    // guards a consistent snapshot.
    fn lock(&self) -> MutexGuard<'_, Credential> {
        self.credential.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: CredentialSource + 'static> CredentialTokenProvider<S> {
    /// Register this provider's [`get_token_and_expiry`](Self::get_token_and_expiry)
    /// as a token callback.
    pub fn callback(self: Arc<Self>) -> TokenCallback {
        Arc::new(move || self.get_token_and_expiry())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use chrono::{DateTime, TimeDelta};

    use crate::token::Claims;

    /// Scripted identity provider counting its refresh calls.
    struct FakeSource {
        initial: Credential,
        refreshed: Option<Credential>,
        refreshes: AtomicUsize,
    }

    impl FakeSource {
        fn new(initial: Credential, refreshed: Option<Credential>) -> Self {
            Self {
                initial,
                refreshed,
                refreshes: AtomicUsize::new(0),
            }
        }

        fn refreshes(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    impl CredentialSource for FakeSource {
        fn default_credential(&self) -> Credential {
            self.initial.clone()
        }

        fn refresh(&self, _current: &Credential) -> Result<Credential, CredentialRefreshError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            self.refreshed.clone().ok_or(CredentialRefreshError::Rejected {
                status: 400,
                body: "invalid_grant".into(),
            })
        }
    }

    fn in_secs(secs: i64) -> DateTime<Utc> {
        Utc::now() + TimeDelta::seconds(secs)
    }

    fn now_secs() -> f64 {
        token::unix_seconds(Utc::now())
    }

    #[test]
    fn valid_credential_is_never_refreshed() {
        let cred = Credential::issued("svc@example", "abc123", in_secs(3600));
        let provider = CredentialTokenProvider::new(FakeSource::new(cred, None));

        for _ in 0..5 {
            provider.get_token_and_expiry().unwrap();
        }
        assert_eq!(provider.source().refreshes(), 0);
    }

    #[test]
    fn invalid_credential_is_refreshed_exactly_once() {
        let fresh = Credential::issued("svc@example", "fresh", in_secs(3600));
        let provider = CredentialTokenProvider::new(FakeSource::new(
            Credential::unresolved("svc@example"),
            Some(fresh.clone()),
        ));

        let grant = provider.get_token_and_expiry().unwrap();
        assert_eq!(provider.source().refreshes(), 1);
        assert_eq!(provider.current_credential(), fresh);

        let secret = URL_SAFE_NO_PAD
            .decode(grant.token.split('.').nth(2).unwrap())
            .unwrap();
        assert_eq!(secret, b"fresh");

        provider.get_token_and_expiry().unwrap();
        assert_eq!(provider.source().refreshes(), 1);
    }

    #[test]
    fn credential_inside_threshold_is_refreshed() {
        let nearly_expired = Credential::issued("svc@example", "old", in_secs(60));
        let fresh = Credential::issued("svc@example", "new", in_secs(3600));
        let provider =
            CredentialTokenProvider::new(FakeSource::new(nearly_expired, Some(fresh)));

        provider.ensure_valid_credential().unwrap();
        assert_eq!(provider.source().refreshes(), 1);
    }

    #[test]
    fn one_hour_credential_scenario() {
        let cred = Credential::issued("svc@example", "abc123", in_secs(3600));
        let provider = CredentialTokenProvider::new(FakeSource::new(cred, None));

        let before = now_secs();
        let grant = provider.get_token_and_expiry().unwrap();

        assert_eq!(grant.token.split('.').count(), 3);
        assert!(grant.expires_at > before);
        assert!((grant.expires_at - before - 3600.0).abs() <= 1.0);

        let claims: Claims = serde_json::from_slice(
            &URL_SAFE_NO_PAD
                .decode(grant.token.split('.').nth(1).unwrap())
                .unwrap(),
        )
        .unwrap();
        assert_eq!(claims.sub, "svc@example");
    }

    #[test]
    fn refresh_failure_propagates_without_token() {
        let provider = CredentialTokenProvider::new(FakeSource::new(
            Credential::unresolved("svc@example"),
            None,
        ));

        let err = provider.get_token_and_expiry().unwrap_err();
        assert!(matches!(
            err,
            TokenError::Refresh(CredentialRefreshError::Rejected { status: 400, .. })
        ));
        assert_eq!(provider.source().refreshes(), 1);
        assert_eq!(
            provider.current_credential(),
            Credential::unresolved("svc@example")
        );
    }

    #[test]
    fn expired_refresh_result_is_rejected() {
        let stale = Credential::issued("svc@example", "stale", in_secs(-10));
        let provider = CredentialTokenProvider::new(FakeSource::new(
            Credential::unresolved("svc@example"),
            Some(stale),
        ));

        let err = provider.get_token_and_expiry().unwrap_err();
        assert!(matches!(
            err,
            TokenError::Refresh(CredentialRefreshError::ExpiredOnArrival { .. })
        ));
    }

    #[test]
    fn refresh_result_inside_threshold_is_still_usable() {
        let short_lived = Credential::issued("svc@example", "short", in_secs(120));
        let provider = CredentialTokenProvider::new(FakeSource::new(
            Credential::unresolved("svc@example"),
            Some(short_lived),
        ));

        let before = now_secs();
        let grant = provider.get_token_and_expiry().unwrap();
        assert!(grant.expires_at > before);
    }

    #[test]
    fn token_matches_callback_token_shape() {
        let cred = Credential::issued("svc@example", "abc123", in_secs(3600));
        let provider = CredentialTokenProvider::new(FakeSource::new(cred, None));
        let token = provider.token().unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(provider.principal(), "svc@example");
    }

    #[test]
    fn callback_is_shareable_across_threads() {
        let fresh = Credential::issued("svc@example", "fresh", in_secs(3600));
        let provider = Arc::new(CredentialTokenProvider::new(FakeSource::new(
            Credential::unresolved("svc@example"),
            Some(fresh),
        )));
        let callback = Arc::clone(&provider).callback();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let callback = Arc::clone(&callback);
                std::thread::spawn(move || callback())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(provider.source().refreshes(), 1);
    }
}
