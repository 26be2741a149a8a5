//! Bearer-token assembly.
//!
//! The broker expects a JWT-shaped token whose third segment is the raw
//! access secret instead of a signature:
//!
//! ```text
//! base64url(header) . base64url(claims) . base64url(access_secret)
//! ```
//!
//! Every segment is URL-safe base64 **without** `=` padding; the broker's
//! decoder rejects padded input.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::TokenError;

/// Fixed `typ` of the token header.
pub const TOKEN_TYPE: &str = "JWT";
/// Fixed `alg` of the token header; tells the broker the third segment is
/// a provider access token rather than a signature.
pub const TOKEN_ALGORITHM: &str = "GOOG_OAUTH2_TOKEN";
/// Issuer claim identifying the identity provider.
pub const ISSUER: &str = "Google";
/// Capability scope naming the target messaging system.
pub const SCOPE: &str = "kafka";

// ---------------------------------------------------------------------------
// Token parts
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Header {
    typ: &'static str,
    alg: &'static str,
}

const HEADER: Header = Header {
    typ: TOKEN_TYPE,
    alg: TOKEN_ALGORITHM,
};

/// Claims embedded in the second token segment.
///
/// All five keys are mandatory on the broker side, so none of them is
/// optional here.  Timestamps are Unix seconds with sub-second precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Credential expiry.
    pub exp: f64,
    /// Identity provider.
    pub iss: String,
    /// Token construction time.
    pub iat: f64,
    /// Target messaging system.
    pub scope: String,
    /// Authenticated principal.
    pub sub: String,
}

/// What the broker client's token callback receives.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    /// The bearer token.
    pub token: String,
    /// Absolute expiry, Unix seconds.
    pub expires_at: f64,
}

impl From<TokenGrant> for (String, f64) {
    fn from(grant: TokenGrant) -> Self {
        (grant.token, grant.expires_at)
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Encode `text` as URL-safe base64 with the `=` padding stripped.
pub fn encode_segment(text: &str) -> String {
    URL_SAFE_NO_PAD.encode(text.as_bytes())
}

/// Build the claims for `credential` as of `now`.
///
/// Fails if the credential holds no access material; callers are expected
/// to have validated (or refreshed) it just before.
pub fn build_claims(credential: &Credential, now: DateTime<Utc>) -> Result<Claims, TokenError> {
    let (_, expiry) = credential
        .access()
        .ok_or_else(|| stale(credential))?;

    Ok(Claims {
        exp: unix_seconds(expiry),
        iss: ISSUER.to_string(),
        iat: unix_seconds(now),
        scope: SCOPE.to_string(),
        sub: credential.principal().to_string(),
    })
}

/// Assemble the three-segment bearer token for `credential` as of `now`.
pub fn build_bearer_token(credential: &Credential, now: DateTime<Utc>) -> Result<String, TokenError> {
    let (secret, _) = credential
        .access()
        .ok_or_else(|| stale(credential))?;
    let claims = build_claims(credential, now)?;

    Ok([
        encode_segment(&serde_json::to_string(&HEADER)?),
        encode_segment(&serde_json::to_string(&claims)?),
        encode_segment(secret),
    ]
    .join("."))
}

/// Unix seconds (with microsecond precision) of a UTC instant.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn unix_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}

fn stale(credential: &Credential) -> TokenError {
    TokenError::StaleCredential {
        principal: credential.principal().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use proptest::prelude::*;

    fn decode(segment: &str) -> Vec<u8> {
        URL_SAFE_NO_PAD.decode(segment).unwrap()
    }

    fn issued(secret: &str) -> Credential {
        Credential::issued(
            "svc@example",
            secret,
            Utc::now() + TimeDelta::seconds(3600),
        )
    }

    #[test]
    fn short_inputs_have_no_padding() {
        assert_eq!(encode_segment("a"), "YQ");
        assert_eq!(encode_segment("ab"), "YWI");
        assert_eq!(encode_segment("abc"), "YWJj");
        assert_eq!(encode_segment(""), "");
    }

    #[test]
    fn uses_url_safe_alphabet() {
        // U+FBFF is ef af bf, which is "76+/" in the standard alphabet.
        let encoded = encode_segment("\u{fbff}");
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(decode(&encoded), "\u{fbff}".as_bytes());
    }

    #[test]
    fn header_segment_is_fixed() {
        let token = build_bearer_token(&issued("abc123"), Utc::now()).unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&decode(token.split('.').next().unwrap())).unwrap();
        assert_eq!(header["typ"], "JWT");
        assert_eq!(header["alg"], "GOOG_OAUTH2_TOKEN");
    }

    #[test]
    fn claims_segment_carries_all_keys_in_order() {
        let now = Utc::now();
        let cred = issued("abc123");
        let token = build_bearer_token(&cred, now).unwrap();

        let body = String::from_utf8(decode(token.split('.').nth(1).unwrap())).unwrap();
        let claims: Claims = serde_json::from_str(&body).unwrap();
        assert_eq!(claims, build_claims(&cred, now).unwrap());
        assert_eq!(claims.iss, "Google");
        assert_eq!(claims.scope, "kafka");
        assert_eq!(claims.sub, "svc@example");

        let keys: Vec<String> = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&body)
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(keys, ["exp", "iss", "iat", "scope", "sub"]);
    }

    #[test]
    fn claims_timestamps_track_credential_and_clock() {
        let now = Utc::now();
        let expiry = now + TimeDelta::seconds(1800);
        let cred = Credential::issued("svc@example", "abc123", expiry);
        let claims = build_claims(&cred, now).unwrap();

        assert!((claims.exp - claims.iat - 1800.0).abs() < 1e-3);
        assert!((claims.iat - unix_seconds(now)).abs() < 1e-6);
    }

    #[test]
    fn secret_segment_is_the_raw_access_secret() {
        let token = build_bearer_token(&issued("ya29.a0Af-secret"), Utc::now()).unwrap();
        assert_eq!(decode(token.split('.').nth(2).unwrap()), b"ya29.a0Af-secret");
    }

    #[test]
    fn unresolved_credential_yields_no_token() {
        let cred = Credential::unresolved("svc@example");
        let err = build_bearer_token(&cred, Utc::now()).unwrap_err();
        assert!(matches!(err, TokenError::StaleCredential { principal } if principal == "svc@example"));
        assert!(build_claims(&cred, Utc::now()).is_err());
    }

    #[test]
    fn grant_converts_into_callback_tuple() {
        let grant = TokenGrant {
            token: "a.b.c".into(),
            expires_at: 42.5,
        };
        let (token, expires_at): (String, f64) = grant.into();
        assert_eq!(token, "a.b.c");
        assert!((expires_at - 42.5).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn encode_segment_round_trips(text in ".*") {
            let encoded = encode_segment(&text);
            prop_assert!(!encoded.contains('='));
            prop_assert!(!encoded.contains('.'));
            prop_assert_eq!(decode(&encoded), text.as_bytes());
        }

        #[test]
        fn bearer_token_has_three_non_empty_segments(
            principal in "[a-z0-9@.-]{0,40}",
            secret in ".{1,200}",
            ttl in 1i64..86_400,
        ) {
            let cred = Credential::issued(principal, secret, Utc::now() + TimeDelta::seconds(ttl));
            let token = build_bearer_token(&cred, Utc::now()).unwrap();
            let segments: Vec<&str> = token.split('.').collect();
            prop_assert_eq!(segments.len(), 3);
            prop_assert!(segments.iter().all(|s| !s.is_empty()));
        }
    }
}
