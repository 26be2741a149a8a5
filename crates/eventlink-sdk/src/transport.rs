//! Where published payloads go.
//!
//! [`EventSink`] is the boundary between the publisher and the broker
//! client.  [`NatsSink`] is the production implementation: a NATS
//! connection that authenticates every (re)connect with a bearer token from
//! the configured [`TokenCallback`].
//!
//! A connection that stays up would otherwise keep riding on its first
//! token forever, so the sink also watches the expiry of the last token it
//! presented and forces a reconnect shortly before it lapses.  The reconnect
//! handshake calls the token callback again, which refreshes the credential.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_nats::{Auth, AuthError, ConnectOptions};
use chrono::Utc;
use eventlink_auth::credential::REFRESH_THRESHOLD_SECS;
use eventlink_auth::TokenCallback;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::error::{ClientInitializationError, PublishError};
use crate::topic::TopicName;

/// A broker client able to buffer and flush payloads.
pub trait EventSink: Send + Sync {
    /// Hand `payload` to the client for delivery on `topic`.
    fn enqueue(
        &self,
        topic: &TopicName,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Wait until everything enqueued so far has left the local buffer.
    fn flush(&self, topic: &TopicName) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// NATS connection authenticated with bearer tokens.
#[derive(Clone, Debug)]
pub struct NatsSink {
    client: async_nats::Client,
    // Stops the re-authentication task once the last clone is dropped.
    _reauth: Arc<DropGuard>,
}

impl NatsSink {
    /// Construct the client described by `config`.
    ///
    /// Only structural problems fail here.  The connection itself is
    /// established (and re-established) in the background; each attempt
    /// calls the token callback on a blocking thread, since a credential
    /// refresh may block on the network.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, ClientInitializationError> {
        let servers = config.server_addrs()?;
        let callback = Arc::clone(&config.oauth_callback);
        let (expiries_tx, expiries_rx) = watch::channel(None);
        let expiries_tx = Arc::new(expiries_tx);

        let mut options = ConnectOptions::with_auth_callback(move |_nonce| {
            present_token(Arc::clone(&callback), Arc::clone(&expiries_tx))
        })
        .require_tls(config.security_protocol.requires_tls())
        .retry_on_initial_connect();

        if let Some(client_id) = &config.client_id {
            options = options.name(client_id);
        }
        if let Some(ca) = &config.ssl_ca_location {
            if !ca.is_file() {
                return Err(ClientInitializationError::Tls(format!(
                    "CA bundle {} is not a readable file",
                    ca.display()
                )));
            }
            options = options.add_root_certificates(ca.clone());
        }

        info!(
            servers = ?config.bootstrap_servers,
            security_protocol = %config.security_protocol,
            sasl_mechanism = %config.sasl_mechanism,
            "creating broker client"
        );
        let client = options.connect(servers.as_slice()).await?;

        let cancel = CancellationToken::new();
        let reconnector = client.clone();
        tokio::spawn(reauthenticate_on_expiry(expiries_rx, cancel.clone(), move || {
            let client = reconnector.clone();
            async move {
                if let Err(e) = client.force_reconnect().await {
                    warn!(error = %e, "forced reconnect failed");
                }
            }
        }));

        Ok(Self {
            client,
            _reauth: Arc::new(cancel.drop_guard()),
        })
    }

    /// Access the raw NATS client.
    pub fn nats_client(&self) -> &async_nats::Client {
        &self.client
    }
}

impl EventSink for NatsSink {
    async fn enqueue(&self, topic: &TopicName, payload: Vec<u8>) -> Result<(), PublishError> {
        self.client
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| PublishError::Enqueue {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn flush(&self, topic: &TopicName) -> Result<(), PublishError> {
        self.client.flush().await.map_err(|e| PublishError::Flush {
            topic: topic.to_string(),
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Token presentation and re-authentication
// ---------------------------------------------------------------------------

/// Run the token callback for one connection handshake and publish the
/// grant's expiry to the re-authentication task.
async fn present_token(
    callback: TokenCallback,
    expiries: Arc<watch::Sender<Option<f64>>>,
) -> Result<Auth, AuthError> {
    let grant = tokio::task::spawn_blocking(move || callback())
        .await
        .map_err(AuthError::new)?
        .map_err(|e| {
            warn!(error = %e, "token callback failed, connection attempt aborted");
            AuthError::new(e)
        })?;
    debug!(expires_at = grant.expires_at, "presenting bearer token");
    expiries.send_replace(Some(grant.expires_at));

    let mut auth = Auth::new();
    auth.token = Some(grant.token);
    Ok(auth)
}

/// Call `reconnect` ahead of each presented token's expiry until `cancel`
/// fires or the connection's callback goes away.
async fn reauthenticate_on_expiry<F, Fut>(
    mut expiries: watch::Receiver<Option<f64>>,
    cancel: CancellationToken,
    reconnect: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    loop {
        let delay = (*expiries.borrow_and_update()).map(|expires_at| reauth_delay(expires_at, unix_now()));

        tokio::select! {
            () = cancel.cancelled() => return,
            changed = expiries.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            () = sleep_for(delay) => {
                info!("bearer token about to expire, re-authenticating");
                reconnect().await;
                // Re-arm only once the reconnect has presented a new token.
                tokio::select! {
                    () = cancel.cancelled() => return,
                    changed = expiries.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Time until a token expiring at `expires_at` should be replaced.
///
/// Aims for [`REFRESH_THRESHOLD_SECS`] before expiry, so the callback finds
/// the credential stale and refreshes it, but never later than half the
/// remaining lifetime.
#[allow(clippy::cast_precision_loss)]
fn reauth_delay(expires_at: f64, now: f64) -> Duration {
    let remaining = expires_at - now;
    let secs = (remaining - REFRESH_THRESHOLD_SECS as f64).max(remaining / 2.0);
    if secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

async fn sleep_for(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

#[allow(clippy::cast_precision_loss)]
fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
