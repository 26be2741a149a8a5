//! Broker client configuration.
//!
//! [`BrokerConfig`] is the whole contract with the broker client: where to
//! connect, how the transport is secured, and the token callback used to
//! authenticate every connection.
//!
//! It can be built programmatically or from the familiar string-keyed
//! client properties:
//!
//! | Property | Values | Default |
//! |----------|--------|---------|
//! | `bootstrap.servers` | `host:port[,host:port…]` | required |
//! | `security.protocol` | `SASL_SSL`, `SASL_PLAINTEXT` | `SASL_SSL` |
//! | `sasl.mechanism` / `sasl.mechanisms` | `OAUTHBEARER` | `OAUTHBEARER` |
//! | `ssl.ca.location` | path to a PEM bundle | system roots |
//! | `client.id` | free text | none |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_nats::ServerAddr;
use eventlink_auth::TokenCallback;

use crate::error::ClientInitializationError;

// ---------------------------------------------------------------------------
// Enumerated settings
// ---------------------------------------------------------------------------

/// How the broker connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum SecurityProtocol {
    /// SASL authentication over TLS.
    #[default]
    #[strum(serialize = "SASL_SSL")]
    SaslSsl,
    /// SASL authentication over plaintext; local development only.
    #[strum(serialize = "SASL_PLAINTEXT")]
    SaslPlaintext,
}

impl SecurityProtocol {
    /// Whether the transport must be TLS.
    pub fn requires_tls(self) -> bool {
        matches!(self, Self::SaslSsl)
    }

    fn scheme(self) -> &'static str {
        match self {
            Self::SaslSsl => "tls",
            Self::SaslPlaintext => "nats",
        }
    }
}

/// SASL mechanism used to authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum SaslMechanism {
    /// Bearer token supplied by a callback.
    #[default]
    #[strum(serialize = "OAUTHBEARER")]
    OAuthBearer,
}

// ---------------------------------------------------------------------------
// Bootstrap servers
// ---------------------------------------------------------------------------

/// One `host:port` bootstrap address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapServer {
    /// Host name or IP literal (IPv6 in brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl fmt::Display for BootstrapServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for BootstrapServer {
    type Err = ClientInitializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ClientInitializationError::InvalidBootstrap {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim();
        let without_scheme = trimmed
            .split_once("://")
            .map_or(trimmed, |(_, rest)| rest);
        let (host, port) = without_scheme
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;

        if host.is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if host.contains(['/', ' ', ',']) {
            return Err(invalid("host contains illegal characters"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| invalid("port must be a number between 1 and 65535"))?;
        if port == 0 {
            return Err(invalid("port must be a number between 1 and 65535"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Parse a comma-separated bootstrap list.
pub fn parse_bootstrap_servers(list: &str) -> Result<Vec<BootstrapServer>, ClientInitializationError> {
    let servers = list
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<BootstrapServer>, _>>()?;

    if servers.is_empty() {
        return Err(ClientInitializationError::InvalidBootstrap {
            value: list.to_string(),
            reason: "at least one server is required".to_string(),
        });
    }
    Ok(servers)
}

// ---------------------------------------------------------------------------
// BrokerConfig
// ---------------------------------------------------------------------------

/// Everything needed to construct the broker client.
#[derive(Clone)]
pub struct BrokerConfig {
    /// Servers to bootstrap from.
    pub bootstrap_servers: Vec<BootstrapServer>,
    /// Transport security.
    pub security_protocol: SecurityProtocol,
    /// Authentication mechanism.
    pub sasl_mechanism: SaslMechanism,
    /// Invoked on every (re)connect for a fresh bearer token.
    pub oauth_callback: TokenCallback,
    /// Extra CA bundle to trust.
    pub ssl_ca_location: Option<PathBuf>,
    /// Client name reported to the broker.
    pub client_id: Option<String>,
}

impl BrokerConfig {
    /// SASL_SSL + OAUTHBEARER configuration for `bootstrap_servers`.
    pub fn new(
        bootstrap_servers: &str,
        oauth_callback: TokenCallback,
    ) -> Result<Self, ClientInitializationError> {
        Ok(Self {
            bootstrap_servers: parse_bootstrap_servers(bootstrap_servers)?,
            security_protocol: SecurityProtocol::default(),
            sasl_mechanism: SaslMechanism::default(),
            oauth_callback,
            ssl_ca_location: None,
            client_id: None,
        })
    }

    /// Build from string-keyed client properties.
    pub fn from_properties<'a>(
        properties: impl IntoIterator<Item = (&'a str, &'a str)>,
        oauth_callback: TokenCallback,
    ) -> Result<Self, ClientInitializationError> {
        let mut bootstrap = None;
        let mut security_protocol = SecurityProtocol::default();
        let mut sasl_mechanism = SaslMechanism::default();
        let mut ssl_ca_location = None;
        let mut client_id = None;

        for (key, value) in properties {
            match key {
                "bootstrap.servers" => bootstrap = Some(parse_bootstrap_servers(value)?),
                "security.protocol" => {
                    security_protocol = value.parse().map_err(|_| {
                        ClientInitializationError::UnsupportedProtocol(value.to_string())
                    })?;
                }
                "sasl.mechanism" | "sasl.mechanisms" => {
                    sasl_mechanism = value.parse().map_err(|_| {
                        ClientInitializationError::UnsupportedMechanism(value.to_string())
                    })?;
                }
                "ssl.ca.location" => ssl_ca_location = Some(PathBuf::from(value)),
                "client.id" => client_id = Some(value.to_string()),
                other => return Err(ClientInitializationError::UnknownProperty(other.to_string())),
            }
        }

        let bootstrap_servers = bootstrap.ok_or_else(|| ClientInitializationError::InvalidBootstrap {
            value: String::new(),
            reason: "bootstrap.servers is required".to_string(),
        })?;

        Ok(Self {
            bootstrap_servers,
            security_protocol,
            sasl_mechanism,
            oauth_callback,
            ssl_ca_location,
            client_id,
        })
    }

    /// Replace the security protocol.
    #[must_use]
    pub fn with_security_protocol(mut self, protocol: SecurityProtocol) -> Self {
        self.security_protocol = protocol;
        self
    }

    /// Trust an additional CA bundle.
    #[must_use]
    pub fn with_ssl_ca_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssl_ca_location = Some(path.into());
        self
    }

    /// Set the client name reported to the broker.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Transport addresses, with the scheme implied by the security protocol.
    pub fn server_addrs(&self) -> Result<Vec<ServerAddr>, ClientInitializationError> {
        let scheme = self.security_protocol.scheme();
        self.bootstrap_servers
            .iter()
            .map(|server| {
                format!("{scheme}://{server}").parse::<ServerAddr>().map_err(|e| {
                    ClientInitializationError::InvalidBootstrap {
                        value: server.to_string(),
                        reason: e.to_string(),
                    }
                })
            })
            .collect()
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("oauth_callback", &"<callback>")
            .field("ssl_ca_location", &self.ssl_ca_location)
            .field("client_id", &self.client_id)
            .finish()
    }
}
