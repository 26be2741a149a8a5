//! CLI configuration from the environment.

use anyhow::{Context, Result};

/// Default broker port when `BROKER_PORT` is unset or unparsable.
pub const DEFAULT_BROKER_PORT: u16 = 4222;

/// Host variable of earlier deployments, honoured as a fallback.
pub const LEGACY_HOST_VAR: &str = "KAFKA_IP";

/// Settings read from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// Broker host name or IP.
    pub broker_host: Option<String>,
    /// Broker port.
    pub broker_port: u16,
}

impl CliConfig {
    /// Build the configuration from environment variables.
    ///
    /// | Variable      | Default | Description        |
    /// |---------------|---------|--------------------|
    /// | `BROKER_HOST` | —       | Broker host (required to publish) |
    /// | `KAFKA_IP`    | —       | Older name for `BROKER_HOST`, read when it is unset |
    /// | `BROKER_PORT` | `4222`  | Broker port        |
    ///
    /// Credential discovery reads its own variables
    /// (`GOOGLE_APPLICATION_CREDENTIALS`, `GCE_METADATA_HOST`).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).filter(|h| !h.trim().is_empty());
        let broker_host = non_blank("BROKER_HOST").or_else(|| non_blank(LEGACY_HOST_VAR));
        let broker_port = lookup("BROKER_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_BROKER_PORT);

        Self {
            broker_host,
            broker_port,
        }
    }

    /// `host:port` of the broker, with an optional port override.
    pub fn broker_address(&self, port_override: Option<u16>) -> Result<String> {
        let host = self
            .broker_host
            .as_deref()
            .context("neither BROKER_HOST nor KAFKA_IP is set")?;
        Ok(format!("{host}:{}", port_override.unwrap_or(self.broker_port)))
    }
}
