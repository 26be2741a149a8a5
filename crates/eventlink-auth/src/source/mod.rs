//! Identity providers the token provider draws credentials from.
//!
//! [`CredentialSource`] is the seam between the token flow and the outside
//! world.  Production code uses [`AmbientSource`], which locates the
//! process's default Google identity the same way the platform client
//! libraries do:
//!
//! | Order | Location | Source |
//! |-------|----------|--------|
//! | 1 | `GOOGLE_APPLICATION_CREDENTIALS` | [`ServiceAccountSource`] |
//! | 2 | `<config dir>/gcloud/application_default_credentials.json` | [`ServiceAccountSource`] (service-account keys only) |
//! | 3 | metadata server (`GCE_METADATA_HOST`) | [`MetadataSource`] |

mod metadata;
mod service_account;

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::credential::Credential;
use crate::error::CredentialRefreshError;

pub use metadata::{MetadataSource, DEFAULT_METADATA_HOST};
pub use service_account::{ServiceAccountKey, ServiceAccountSource, CLOUD_PLATFORM_SCOPE};

/// Environment variable naming an explicit credentials file.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Environment variable overriding the metadata server host.
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";

/// A provider of identity credentials.
///
/// Both calls may block; `refresh` typically performs a network round-trip.
pub trait CredentialSource: Send + Sync {
    /// The credential to start from.  Must not perform network I/O.
    fn default_credential(&self) -> Credential;

    /// Obtain fresh access material for `current`'s identity.
    fn refresh(&self, current: &Credential) -> Result<Credential, CredentialRefreshError>;
}

// ---------------------------------------------------------------------------
// Ambient discovery
// ---------------------------------------------------------------------------

/// The process's default identity, as discovered from its environment.
#[derive(Debug)]
pub enum AmbientSource {
    /// A service-account key file.
    ServiceAccount(ServiceAccountSource),
    /// The compute metadata server.
    Metadata(MetadataSource),
}

impl AmbientSource {
    /// Discover credentials from the process environment.
    pub fn discover() -> Result<Self, CredentialRefreshError> {
        Self::discover_with(|key| std::env::var(key).ok(), dirs::config_dir())
    }

    /// Discover credentials using `env` for variable lookups and
    /// `config_dir` as the user configuration directory.
    pub fn discover_with(
        env: impl Fn(&str) -> Option<String>,
        config_dir: Option<PathBuf>,
    ) -> Result<Self, CredentialRefreshError> {
        if let Some(path) = env(CREDENTIALS_ENV).filter(|p| !p.is_empty()) {
            let source = ServiceAccountSource::from_file(Path::new(&path))?;
            info!(path = %path, principal = %source.key().client_email, "using credentials from {CREDENTIALS_ENV}");
            return Ok(Self::ServiceAccount(source));
        }

        if let Some(path) = config_dir.map(well_known_file).filter(|p| p.is_file()) {
            match ServiceAccountSource::from_file(&path) {
                Ok(source) => {
                    info!(path = %path.display(), principal = %source.key().client_email, "using gcloud application default credentials");
                    return Ok(Self::ServiceAccount(source));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping gcloud application default credentials");
                }
            }
        }

        let host = env(METADATA_HOST_ENV)
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        info!(host = %host, "using metadata server credentials");
        Ok(Self::Metadata(MetadataSource::with_host(host)?))
    }
}

impl CredentialSource for AmbientSource {
    fn default_credential(&self) -> Credential {
        match self {
            Self::ServiceAccount(s) => s.default_credential(),
            Self::Metadata(s) => s.default_credential(),
        }
    }

    fn refresh(&self, current: &Credential) -> Result<Credential, CredentialRefreshError> {
        match self {
            Self::ServiceAccount(s) => s.refresh(current),
            Self::Metadata(s) => s.refresh(current),
        }
    }
}

fn well_known_file(config_dir: PathBuf) -> PathBuf {
    config_dir
        .join("gcloud")
        .join("application_default_credentials.json")
}

// ---------------------------------------------------------------------------
// Shared OAuth response handling
// ---------------------------------------------------------------------------

/// OAuth2 access-token response, as returned by both the token endpoint
/// and the metadata server.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
}

impl TokenResponse {
    /// The credential this response issues to `principal`, expiring
    /// `expires_in` seconds from now.
    pub(crate) fn into_credential(
        self,
        principal: impl Into<String>,
    ) -> Result<Credential, CredentialRefreshError> {
        let expiry = expiry_after(Utc::now(), self.expires_in)?;
        Ok(Credential::issued(principal, self.access_token, expiry))
    }
}

/// `now + expires_in` seconds, rejecting lifetimes chrono cannot represent.
pub(crate) fn expiry_after(
    now: DateTime<Utc>,
    expires_in: i64,
) -> Result<DateTime<Utc>, CredentialRefreshError> {
    TimeDelta::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            CredentialRefreshError::MalformedResponse(format!(
                "token lifetime of {expires_in}s is out of range"
            ))
        })
}

/// Read a response body, turning non-success statuses into
/// [`CredentialRefreshError::Rejected`].
pub(crate) fn read_body(res: reqwest::blocking::Response) -> Result<String, CredentialRefreshError> {
    let status = res.status();
    let body = res.text()?;
    if !status.is_success() {
        return Err(CredentialRefreshError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

pub(crate) fn parse_token_response(body: &str) -> Result<TokenResponse, CredentialRefreshError> {
    serde_json::from_str(body)
        .map_err(|e| CredentialRefreshError::MalformedResponse(format!("token response: {e}")))
}
