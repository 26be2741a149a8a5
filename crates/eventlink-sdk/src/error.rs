//! SDK error types.
//!
//! [`ClientInitializationError`] is fatal: a publisher that cannot be built
//! never exists.  [`PublishError`] concerns a single message only; the
//! publisher that returned it stays usable.

/// The broker client could not be constructed.
#[derive(Debug, thiserror::Error)]
pub enum ClientInitializationError {
    /// A bootstrap server address could not be parsed.
    #[error("invalid bootstrap server \"{value}\": {reason}")]
    InvalidBootstrap {
        /// The value that failed validation.
        value: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// The topic name is not a legal topic.
    #[error("invalid topic name \"{value}\": {reason}")]
    InvalidTopic {
        /// The value that failed validation.
        value: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// The requested security protocol is not supported.
    #[error("unsupported security protocol: {0}")]
    UnsupportedProtocol(String),

    /// The requested SASL mechanism is not supported.
    #[error("unsupported SASL mechanism: {0}")]
    UnsupportedMechanism(String),

    /// A configuration property is not recognised.
    #[error("unknown configuration property: {0}")]
    UnknownProperty(String),

    /// TLS material could not be used.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// The broker client rejected its configuration.
    #[error("broker client error: {0}")]
    Connect(String),
}

impl From<async_nats::ConnectError> for ClientInitializationError {
    fn from(e: async_nats::ConnectError) -> Self {
        ClientInitializationError::Connect(e.to_string())
    }
}

/// A single message could not be published.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The message could not be serialized.
    #[error("couldn't serialize message {message}: {source}")]
    Serialization {
        /// Debug rendering of the offending message.
        message: String,
        /// Underlying serializer error.
        source: serde_json::Error,
    },

    /// The broker client refused to enqueue the payload.
    #[error("couldn't enqueue message on {topic}: {reason}")]
    Enqueue {
        /// Target topic.
        topic: String,
        /// Underlying client error.
        reason: String,
    },

    /// The local send buffer could not be drained.
    #[error("couldn't flush messages on {topic}: {reason}")]
    Flush {
        /// Target topic.
        topic: String,
        /// Underlying client error.
        reason: String,
    },
}
