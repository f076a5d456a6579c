//! Broker-neutral message headers and outbound messages

use super::APP_ID;
use std::collections::BTreeMap;

/// Message headers keyed by name
pub type Headers = BTreeMap<String, HeaderValue>;

/// A header value. Mirrors the AMQP field value types the router forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Seconds since the Unix epoch
    Timestamp(u64),
    Array(Vec<HeaderValue>),
    Table(Headers),
    Void,
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

/// A message about to be published to a partition
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub headers: Headers,
    /// Publish time, seconds since the Unix epoch
    pub timestamp: u64,
    pub app_id: String,
}

impl OutboundMessage {
    /// Build a message stamped with the current time and the router's app id.
    pub fn new(payload: Vec<u8>, headers: Headers) -> Self {
        let timestamp = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        Self {
            payload,
            headers,
            timestamp,
            app_id: APP_ID.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_value_as_str() {
        assert_eq!(HeaderValue::from("k1").as_str(), Some("k1"));
        assert_eq!(HeaderValue::Int(7).as_str(), None);
        assert_eq!(HeaderValue::Bytes(b"k1".to_vec()).as_str(), None);
    }

    #[test]
    fn test_outbound_message_is_stamped() {
        let before = chrono::Utc::now().timestamp() as u64;
        let message = OutboundMessage::new(b"payload".to_vec(), Headers::new());

        assert_eq!(message.app_id, "party-mq");
        assert!(message.timestamp >= before);
        assert_eq!(message.payload, b"payload");
    }
}
