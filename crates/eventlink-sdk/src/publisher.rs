//! Publishing events to one topic.
//!
//! An [`EventPublisher`] owns exactly one broker client bound to one topic.
//! There is no half-built state: a value of this type has a working client.
//!
//! # Typical usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use eventlink_auth::{AmbientSource, CredentialTokenProvider};
//! use eventlink_sdk::EventPublisher;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(CredentialTokenProvider::new(AmbientSource::discover()?));
//! let publisher = EventPublisher::initialize_client("10.0.0.5:9092", "orders", provider).await?;
//!
//! publisher
//!     .publish(&serde_json::json!({ "order_id": 42, "status": "created" }))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use eventlink_auth::{CredentialSource, CredentialTokenProvider};
use serde::Serialize;
use tracing::{error, info};

use crate::config::BrokerConfig;
use crate::error::{ClientInitializationError, PublishError};
use crate::topic::TopicName;
use crate::transport::{EventSink, NatsSink};

/// Publishes serialized events to a single topic.
pub struct EventPublisher<S = NatsSink> {
    sink: S,
    topic: TopicName,
}

impl EventPublisher<NatsSink> {
    /// Build a SASL_SSL / OAUTHBEARER client for `broker_address` whose
    /// token callback is `provider`'s
    /// [`get_token_and_expiry`](CredentialTokenProvider::get_token_and_expiry).
    ///
    /// Fails if the address or topic are structurally invalid.  This is a
    /// startup error; callers are expected to give up.
    pub async fn initialize_client<C: CredentialSource + 'static>(
        broker_address: &str,
        topic: &str,
        provider: Arc<CredentialTokenProvider<C>>,
    ) -> Result<Self, ClientInitializationError> {
        let config = BrokerConfig::new(broker_address, provider.callback())?;
        Self::connect(&config, topic).await
    }

    /// Build the client described by `config`, bound to `topic`.
    pub async fn connect(config: &BrokerConfig, topic: &str) -> Result<Self, ClientInitializationError> {
        let topic: TopicName = topic.parse()?;
        info!(topic = %topic, "connecting event publisher");

        let sink = NatsSink::connect(config).await.inspect_err(|e| {
            error!(error = %e, "failed to create broker client");
        })?;

        info!(topic = %topic, "event publisher ready");
        Ok(Self::with_sink(topic, sink))
    }
}

impl<S: EventSink> EventPublisher<S> {
    /// Publisher over an arbitrary sink.
    pub fn with_sink(topic: TopicName, sink: S) -> Self {
        Self { sink, topic }
    }

    /// Serialize `message`, enqueue it and wait for the local buffer to drain.
    ///
    /// Failures are logged together with the offending message and returned;
    /// they never affect later calls.  Whether the broker eventually accepts
    /// the message is the broker client's concern.
    pub async fn publish<M>(&self, message: &M) -> Result<(), PublishError>
    where
        M: Serialize + fmt::Debug + ?Sized,
    {
        info!(topic = %self.topic, "sending message");
        match self.send(message).await {
            Ok(()) => {
                info!(topic = %self.topic, "message sent");
                Ok(())
            }
            Err(e) => {
                error!(topic = %self.topic, message = ?message, error = %e, "couldn't send message");
                Err(e)
            }
        }
    }

    async fn send<M>(&self, message: &M) -> Result<(), PublishError>
    where
        M: Serialize + fmt::Debug + ?Sized,
    {
        let payload = serde_json::to_vec(message).map_err(|source| PublishError::Serialization {
            message: format!("{message:?}"),
            source,
        })?;
        self.sink.enqueue(&self.topic, payload).await?;
        self.sink.flush(&self.topic).await
    }

    /// The topic this publisher writes to.
    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    /// The underlying sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::{TimeDelta, Utc};
    use eventlink_auth::{Credential, CredentialRefreshError};
    use serde::ser::Error as _;
    use serde_json::{json, Value};

    /// Sink that records payloads; fails the first `fail_enqueues` enqueues.
    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
        flushes: AtomicUsize,
        fail_enqueues: AtomicUsize,
    }

    impl RecordingSink {
        fn failing(n: usize) -> Self {
            let sink = Self::default();
            sink.fail_enqueues.store(n, Ordering::SeqCst);
            sink
        }

        fn payloads(&self) -> Vec<Value> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, bytes)| serde_json::from_slice(bytes).unwrap())
                .collect()
        }
    }

    impl EventSink for RecordingSink {
        async fn enqueue(&self, topic: &TopicName, payload: Vec<u8>) -> Result<(), PublishError> {
            let should_fail = self
                .fail_enqueues
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(PublishError::Enqueue {
                    topic: topic.to_string(),
                    reason: "local queue full".into(),
                });
            }
            self.sent.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }

        async fn flush(&self, _topic: &TopicName) -> Result<(), PublishError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// A value whose serialization always fails.
    #[derive(Debug)]
    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("self-referencing structure"))
        }
    }

    fn publisher(sink: RecordingSink) -> EventPublisher<RecordingSink> {
        EventPublisher::with_sink("orders".parse().unwrap(), sink)
    }

    #[tokio::test]
    async fn publish_round_trips_structure() {
        let publisher = publisher(RecordingSink::default());
        let message = json!({ "order_id": 42, "status": "created" });

        publisher.publish(&message).await.unwrap();

        let sent = publisher.sink().sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "orders");
        let decoded: Value = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(publisher.sink().flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_preserves_key_order() {
        let publisher = publisher(RecordingSink::default());
        let message = json!({ "status": "created", "order_id": 42, "items": [{ "sku": "A1", "qty": 2 }] });

        publisher.publish(&message).await.unwrap();

        let sent = publisher.sink().sent.lock().unwrap().clone();
        assert_eq!(
            String::from_utf8(sent[0].1.clone()).unwrap(),
            r#"{"status":"created","order_id":42,"items":[{"sku":"A1","qty":2}]}"#
        );
    }

    #[tokio::test]
    async fn publish_accepts_typed_messages() {
        #[derive(Debug, Serialize)]
        struct OrderEvent<'a> {
            order_id: u64,
            status: &'a str,
        }

        let publisher = publisher(RecordingSink::default());
        publisher
            .publish(&OrderEvent { order_id: 7, status: "paid" })
            .await
            .unwrap();
        assert_eq!(
            publisher.sink().payloads(),
            vec![json!({ "order_id": 7, "status": "paid" })]
        );
    }

    #[tokio::test]
    async fn serialization_failure_leaves_publisher_usable() {
        let publisher = publisher(RecordingSink::default());

        let err = publisher.publish(&Unserializable).await.unwrap_err();
        match err {
            PublishError::Serialization { message, .. } => assert_eq!(message, "Unserializable"),
            other => panic!("expected serialization error, got {other:?}"),
        }
        assert!(publisher.sink().payloads().is_empty());

        publisher.publish(&json!({ "order_id": 43 })).await.unwrap();
        assert_eq!(publisher.sink().payloads(), vec![json!({ "order_id": 43 })]);
    }

    #[tokio::test]
    async fn enqueue_failure_leaves_publisher_usable() {
        let publisher = publisher(RecordingSink::failing(1));

        let err = publisher.publish(&json!({ "order_id": 1 })).await.unwrap_err();
        assert!(matches!(err, PublishError::Enqueue { topic, .. } if topic == "orders"));
        assert_eq!(publisher.sink().flushes.load(Ordering::SeqCst), 0);

        publisher.publish(&json!({ "order_id": 2 })).await.unwrap();
        assert_eq!(publisher.sink().payloads(), vec![json!({ "order_id": 2 })]);
    }

    // -- initialize_client -------------------------------------------------

    struct StaticSource;

    impl CredentialSource for StaticSource {
        fn default_credential(&self) -> Credential {
            Credential::issued("svc@example", "abc123", Utc::now() + TimeDelta::seconds(3600))
        }

        fn refresh(&self, _current: &Credential) -> Result<Credential, CredentialRefreshError> {
            Err(CredentialRefreshError::Discovery("static source".into()))
        }
    }

    fn provider() -> Arc<CredentialTokenProvider<StaticSource>> {
        Arc::new(CredentialTokenProvider::new(StaticSource))
    }

    #[tokio::test]
    async fn unparsable_broker_address_is_fatal() {
        let result = EventPublisher::initialize_client("not-an-address", "orders", provider()).await;
        assert!(matches!(
            result,
            Err(ClientInitializationError::InvalidBootstrap { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_topic_is_fatal() {
        let result = EventPublisher::initialize_client("127.0.0.1:9092", "orders *", provider()).await;
        assert!(matches!(
            result,
            Err(ClientInitializationError::InvalidTopic { .. })
        ));
    }
}
