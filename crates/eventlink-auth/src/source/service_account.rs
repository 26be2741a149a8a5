//! Service-account key files.
//!
//! Refreshing signs a short RS256 assertion with the key and exchanges it
//! at the key's `token_uri` using the JWT-bearer grant.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{parse_token_response, read_body, CredentialSource};
use crate::credential::Credential;
use crate::error::CredentialRefreshError;

/// Scope requested for the exchanged access token.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// The fields of a service-account JSON key this crate needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Must be `"service_account"`.
    #[serde(rename = "type")]
    pub key_type: String,
    /// Service-account email; becomes the credential principal.
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    /// Key id, sent as the assertion's `kid`.
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// OAuth token endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"[REDACTED]")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Claims of the JWT-bearer assertion.
#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Credential source backed by a service-account key.
pub struct ServiceAccountSource {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    http: reqwest::blocking::Client,
}

impl fmt::Debug for ServiceAccountSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountSource")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountSource {
    /// Load a key file.
    pub fn from_file(path: &Path) -> Result<Self, CredentialRefreshError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CredentialRefreshError::Discovery(format!("cannot read {}: {e}", path.display()))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw).map_err(|e| {
            CredentialRefreshError::Discovery(format!("{} is not a service account key: {e}", path.display()))
        })?;
        Self::from_key(key)
    }

    /// Build a source from an already parsed key.
    pub fn from_key(key: ServiceAccountKey) -> Result<Self, CredentialRefreshError> {
        if key.key_type != "service_account" {
            return Err(CredentialRefreshError::Discovery(format!(
                "unsupported credential type \"{}\"",
                key.key_type
            )));
        }

        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| CredentialRefreshError::InvalidKey(e.to_string()))?;
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            key,
            signing_key,
            http,
        })
    }

    /// The parsed key (private key redacted in `Debug`).
    pub fn key(&self) -> &ServiceAccountKey {
        &self.key
    }

    /// Sign a fresh JWT-bearer assertion.
    pub(crate) fn assertion(&self) -> Result<String, CredentialRefreshError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.key.private_key_id);

        jsonwebtoken::encode(&header, &claims, &self.signing_key)
            .map_err(|e| CredentialRefreshError::InvalidKey(e.to_string()))
    }
}

impl CredentialSource for ServiceAccountSource {
    fn default_credential(&self) -> Credential {
        Credential::unresolved(&self.key.client_email)
    }

    fn refresh(&self, _current: &Credential) -> Result<Credential, CredentialRefreshError> {
        let assertion = self.assertion()?;
        debug!(token_uri = %self.key.token_uri, "exchanging service account assertion");

        let res = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()?;
        let token = parse_token_response(&read_body(res)?)?;

        token.into_credential(&self.key.client_email)
    }
}
