//! Identity credentials as handed out by a [`CredentialSource`](crate::CredentialSource).
//!
//! A [`Credential`] is an immutable snapshot: refreshing produces a new
//! value, which the [`CredentialTokenProvider`](crate::CredentialTokenProvider)
//! swaps in under its lock.

use std::fmt;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

/// Head-room before the real expiry at which a credential stops counting as
/// valid, so a token is never handed out moments before it lapses.
pub const REFRESH_THRESHOLD_SECS: i64 = 225;

/// Short-lived access material issued by the identity provider.
#[derive(Clone, PartialEq, Eq)]
struct AccessMaterial {
    secret: String,
    expiry: DateTime<Utc>,
}

/// An identity plus (optionally) the access material currently issued for it.
///
/// A credential fresh out of discovery usually knows its principal but holds
/// no access material yet; it is never valid until refreshed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    principal: String,
    access: Option<AccessMaterial>,
}

impl Credential {
    /// A credential that identifies `principal` but has not been refreshed yet.
    pub fn unresolved(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            access: None,
        }
    }

    /// A credential carrying access material.
    ///
    /// `expiry` may be expressed in any timezone; it is normalized to UTC here
    /// so every later comparison happens on the same basis.
    pub fn issued<Tz: TimeZone>(
        principal: impl Into<String>,
        secret: impl Into<String>,
        expiry: DateTime<Tz>,
    ) -> Self {
        Self {
            principal: principal.into(),
            access: Some(AccessMaterial {
                secret: secret.into(),
                expiry: expiry.with_timezone(&Utc),
            }),
        }
    }

    /// The authenticated identity (e.g. a service-account email).
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Absolute UTC expiry of the current access material, if any.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.access.as_ref().map(|a| a.expiry)
    }

    /// Whether the access material can be handed out at `now`.
    ///
    /// False when there is no access material, or when it expires within
    /// [`REFRESH_THRESHOLD_SECS`].
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.access
            .as_ref()
            .is_some_and(|a| now + TimeDelta::seconds(REFRESH_THRESHOLD_SECS) < a.expiry)
    }

    /// Whether the access material has not yet reached its hard expiry.
    pub(crate) fn is_unexpired_at(&self, now: DateTime<Utc>) -> bool {
        self.access.as_ref().is_some_and(|a| now < a.expiry)
    }

    /// Secret and expiry, for token assembly only.
    pub(crate) fn access(&self) -> Option<(&str, DateTime<Utc>)> {
        self.access.as_ref().map(|a| (a.secret.as_str(), a.expiry))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("principal", &self.principal)
            .field("expiry", &self.expiry())
            .field("access_secret", &self.access.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
