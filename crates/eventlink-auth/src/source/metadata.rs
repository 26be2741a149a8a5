//! Compute metadata server credentials.

use std::time::Duration;

use tracing::debug;

use super::{parse_token_response, read_body, CredentialSource};
use crate::credential::Credential;
use crate::error::CredentialRefreshError;

/// Metadata server host on Google compute platforms.
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

const ACCOUNT: &str = "default";
const METADATA_FLAVOR: (&str, &str) = ("Metadata-Flavor", "Google");
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Credential source backed by the instance's attached service account.
#[derive(Debug)]
pub struct MetadataSource {
    host: String,
    http: reqwest::blocking::Client,
}

impl MetadataSource {
    /// Talk to the metadata server at `host` (`host` or `host:port`).
    pub fn with_host(host: impl Into<String>) -> Result<Self, CredentialRefreshError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            host: host.into(),
            http,
        })
    }

    /// The metadata server host.
    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, item: &str) -> String {
        format!(
            "http://{}/computeMetadata/v1/instance/service-accounts/{ACCOUNT}/{item}",
            self.host
        )
    }

    fn get(&self, item: &str) -> Result<String, CredentialRefreshError> {
        let res = self
            .http
            .get(self.url(item))
            .header(METADATA_FLAVOR.0, METADATA_FLAVOR.1)
            .send()?;
        read_body(res)
    }
}

impl CredentialSource for MetadataSource {
    fn default_credential(&self) -> Credential {
        // The real email is only known after asking the server.
        Credential::unresolved(ACCOUNT)
    }

    fn refresh(&self, _current: &Credential) -> Result<Credential, CredentialRefreshError> {
        debug!(host = %self.host, "fetching token from metadata server");

        let email = self.get("email")?.trim().to_string();
        if email.is_empty() {
            return Err(CredentialRefreshError::MalformedResponse(
                "metadata server returned an empty service account email".into(),
            ));
        }
        let token = parse_token_response(&self.get("token")?)?;

        token.into_credential(email)
    }
}
