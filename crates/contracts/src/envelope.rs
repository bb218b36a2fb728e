//! Envelope - one broker-delivered unit of bytes, headers and an ack handle

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DestinationName;

/// Header carrying the payload type discriminator
pub const TYPE_HEADER: &str = "_type";

/// Header carrying the body media type
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Message headers (string -> string, ordered for stable logging)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Insert a header, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Copy every entry of `other` into `self`; `other` wins on collision
    pub fn merge_from(&mut self, other: &Headers) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// The type discriminator, if present
    pub fn type_id(&self) -> Option<&str> {
        self.get(TYPE_HEADER)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Message as delivered by the broker
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Broker-assigned message id
    pub message_id: String,

    /// Destination the message was published to
    pub destination: DestinationName,

    /// Codec-produced body
    pub body: Bytes,

    /// Headers (must include the type discriminator)
    pub headers: Headers,

    /// How many times the broker has delivered this message before
    pub redelivery_count: u32,

    /// Broker timestamp at enqueue time
    pub timestamp: DateTime<Utc>,
}

/// Opaque token tied to exactly one broker delivery.
///
/// Not `Clone`: settling a delivery consumes its handle, so a delivery can
/// be acked or nacked at most once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct AckHandle {
    tag: u64,
}

impl AckHandle {
    /// Issued by broker implementations only
    pub fn new(tag: u64) -> Self {
        Self { tag }
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }
}

/// An envelope together with the handle that settles it
#[derive(Debug)]
pub struct Delivery {
    pub envelope: Envelope,
    pub ack: AckHandle,
}

impl Delivery {
    pub fn new(envelope: Envelope, ack: AckHandle) -> Self {
        Self { envelope, ack }
    }

    pub fn into_parts(self) -> (Envelope, AckHandle) {
        (self.envelope, self.ack)
    }
}

/// Broker acknowledgement of a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
    pub destination: DestinationName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overrides_existing() {
        let mut headers = Headers::new()
            .with(TYPE_HEADER, "spoofed")
            .with("trace-id", "abc");
        let codec = Headers::new().with(TYPE_HEADER, "email");

        headers.merge_from(&codec);

        assert_eq!(headers.type_id(), Some("email"));
        assert_eq!(headers.get("trace-id"), Some("abc"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_headers_from_iter() {
        let headers: Headers = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(headers.get("b"), Some("2"));
        assert!(headers.type_id().is_none());
    }

    #[test]
    fn test_delivery_parts() {
        let envelope = Envelope {
            message_id: "m-1".into(),
            destination: "mailbox".into(),
            body: Bytes::from_static(b"{}"),
            headers: Headers::new(),
            redelivery_count: 0,
            timestamp: Utc::now(),
        };
        let (envelope, ack) = Delivery::new(envelope, AckHandle::new(7)).into_parts();
        assert_eq!(envelope.message_id, "m-1");
        assert_eq!(ack.tag(), 7);
    }
}
