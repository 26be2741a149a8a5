//! # eventlink SDK
//!
//! Publishes serialized events to a broker topic over a connection
//! authenticated with short-lived bearer tokens.
//!
//! The SDK provides:
//!
//! * [`EventPublisher`] — one broker client bound to one topic, with a
//!   best-effort [`publish`](EventPublisher::publish).
//! * [`BrokerConfig`] — bootstrap servers, transport security, SASL
//!   mechanism and the token callback.
//! * [`EventSink`] — the broker-client boundary; [`NatsSink`] is the
//!   production implementation.
//! * [`ClientInitializationError`] / [`PublishError`] — fatal start-up
//!   errors versus per-message errors.
//!
//! Token provisioning lives in [`eventlink_auth`], re-exported here.

pub mod config;
pub mod error;
pub mod publisher;
pub mod topic;
pub mod transport;

pub use config::{BootstrapServer, BrokerConfig, SaslMechanism, SecurityProtocol};
pub use error::{ClientInitializationError, PublishError};
pub use publisher::EventPublisher;
pub use topic::TopicName;
pub use transport::{EventSink, NatsSink};

pub use eventlink_auth;
