//! Topic names.
//!
//! Topics follow the usual broker naming rules: 1–249 characters from
//! `[A-Za-z0-9._-]`, and neither `.` nor `..`.  The same string is used as
//! the transport subject, so anything else (spaces, wildcards) is refused
//! up-front.

use std::fmt;
use std::str::FromStr;

use crate::error::ClientInitializationError;

/// Longest legal topic name.
pub const MAX_TOPIC_LEN: usize = 249;

/// A validated topic name.
///
/// # Examples
///
/// ```
/// use eventlink_sdk::TopicName;
///
/// let topic: TopicName = "orders.created".parse().unwrap();
/// assert_eq!(topic.as_str(), "orders.created");
///
/// assert!("orders created".parse::<TopicName>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName(String);

impl TopicName {
    /// Return the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TopicName {
    type Err = ClientInitializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ClientInitializationError::InvalidTopic {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        if s.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if s.len() > MAX_TOPIC_LEN {
            return Err(invalid("must be at most 249 characters"));
        }
        if s == "." || s == ".." {
            return Err(invalid("must not be \".\" or \"..\""));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(invalid("may only contain ASCII letters, digits, '.', '_' and '-'"));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<&str> for TopicName {
    type Error = ClientInitializationError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}
