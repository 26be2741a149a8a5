//! eventlink: publish events to a broker authenticated with the process's
//! ambient cloud identity.
//!
//! ```text
//! eventlink publish --topic orders '{"order_id":42,"status":"created"}'
//! cat events.jsonl | eventlink publish --topic orders
//! eventlink token
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use eventlink_auth::{AmbientSource, CredentialTokenProvider};
use eventlink_sdk::{BrokerConfig, EventPublisher, EventSink, SecurityProtocol};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::config::CliConfig;

/// Publish events with ambient-identity broker authentication.
#[derive(Parser, Debug)]
#[command(name = "eventlink", about = "Publish events with ambient-identity broker authentication")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish JSON messages to a topic.
    Publish {
        /// Target topic.
        #[arg(long)]
        topic: String,

        /// Broker port (overrides BROKER_PORT).
        #[arg(long)]
        port: Option<u16>,

        /// Extra CA bundle to trust for the broker's TLS certificate.
        #[arg(long)]
        ca_file: Option<PathBuf>,

        /// Use SASL_PLAINTEXT instead of SASL_SSL (local brokers only).
        #[arg(long)]
        plaintext: bool,

        /// Additional client property, e.g. `-X client.id=orders-app`.
        #[arg(short = 'X', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,

        /// JSON documents to publish; one per line from stdin when omitted.
        messages: Vec<String>,
    },

    /// Issue a bearer token and print its principal and expiry.
    Token {
        /// Also print the token itself.
        #[arg(long)]
        show_token: bool,
    },
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got \"{raw}\""))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise structured logging (controlled via RUST_LOG env var).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Discovery builds blocking HTTP clients; keep it off the runtime threads.
    let provider = tokio::task::spawn_blocking(|| {
        AmbientSource::discover().map(CredentialTokenProvider::new)
    })
    .await?
    .context("credential discovery failed")?;
    let provider = Arc::new(provider);

    match args.command {
        Command::Publish {
            topic,
            port,
            ca_file,
            plaintext,
            properties,
            messages,
        } => {
            let broker_address = CliConfig::from_env().broker_address(port)?;

            let protocol = if plaintext {
                warn!("SASL_PLAINTEXT selected; bearer tokens will cross the network unencrypted");
                SecurityProtocol::SaslPlaintext
            } else {
                SecurityProtocol::SaslSsl
            };

            let mut props = vec![
                ("bootstrap.servers".to_string(), broker_address),
                ("security.protocol".to_string(), protocol.to_string()),
                ("client.id".to_string(), "eventlink-cli".to_string()),
            ];
            if let Some(ca) = ca_file {
                props.push(("ssl.ca.location".to_string(), ca.display().to_string()));
            }
            props.extend(properties);

            let config = BrokerConfig::from_properties(
                props.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                Arc::clone(&provider).callback(),
            )
            .context("invalid broker configuration")?;

            let publisher = EventPublisher::connect(&config, &topic)
                .await
                .context("failed to create event publisher")?;

            let outcome = if messages.is_empty() {
                publish_stdin(&publisher).await?
            } else {
                let mut outcome = Outcome::default();
                for raw in &messages {
                    outcome.record(publish_raw(&publisher, raw).await);
                }
                outcome
            };

            info!(sent = outcome.sent, failed = outcome.failed, "publishing finished");
            if outcome.failed > 0 {
                bail!(
                    "{} of {} messages could not be published",
                    outcome.failed,
                    outcome.sent + outcome.failed
                );
            }
        }

        Command::Token { show_token } => {
            let grant = tokio::task::spawn_blocking({
                let provider = Arc::clone(&provider);
                move || provider.get_token_and_expiry()
            })
            .await?
            .context("token issuance failed")?;

            #[allow(clippy::cast_possible_truncation)]
            let expiry = DateTime::from_timestamp(grant.expires_at as i64, 0)
                .map_or_else(|| grant.expires_at.to_string(), |t| t.to_rfc3339());

            println!("principal:  {}", provider.principal());
            println!("expires at: {expiry}");
            if show_token {
                println!("token:      {}", grant.token);
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Publishing helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Outcome {
    sent: usize,
    failed: usize,
}

impl Outcome {
    fn record(&mut self, ok: bool) {
        if ok {
            self.sent += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Parse and publish one JSON document; failures are logged, never fatal.
async fn publish_raw<S: EventSink>(publisher: &EventPublisher<S>, raw: &str) -> bool {
    let message: serde_json::Value = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            error!(message = %raw, error = %e, "skipping message that is not valid JSON");
            return false;
        }
    };
    publisher.publish(&message).await.is_ok()
}

async fn publish_stdin<S: EventSink>(publisher: &EventPublisher<S>) -> Result<Outcome> {
    let mut outcome = Outcome::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        outcome.record(publish_raw(publisher, &line).await);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_parsing() {
        assert_eq!(
            parse_property("client.id = orders-app").unwrap(),
            ("client.id".to_string(), "orders-app".to_string())
        );
        assert!(parse_property("client.id").is_err());
        assert!(parse_property("=value").is_err());
    }

    #[test]
    fn args_parse_publish() {
        let args = Args::try_parse_from([
            "eventlink",
            "publish",
            "--topic",
            "orders",
            "-X",
            "client.id=app",
            r#"{"order_id":42}"#,
        ])
        .unwrap();
        match args.command {
            Command::Publish { topic, properties, messages, plaintext, .. } => {
                assert_eq!(topic, "orders");
                assert_eq!(properties, vec![("client.id".to_string(), "app".to_string())]);
                assert_eq!(messages, vec![r#"{"order_id":42}"#.to_string()]);
                assert!(!plaintext);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn outcome_counts() {
        let mut outcome = Outcome::default();
        outcome.record(true);
        outcome.record(false);
        outcome.record(true);
        assert_eq!((outcome.sent, outcome.failed), (2, 1));
    }
}
