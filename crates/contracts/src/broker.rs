//! Broker trait - the capability the core consumes
//!
//! The dispatch core never talks to a transport directly. Publishers and
//! dispatchers are handed something implementing [`Broker`].

use bytes::Bytes;

use crate::{AckHandle, DestinationName, Delivery, Headers, NackReason, SendReceipt, TransportError};

/// Broker capability
///
/// `Broker` is the `Send` variant generated from `LocalBroker`; the core is
/// generic over `Broker` so deliveries can be processed on the tokio
/// multi-threaded runtime.
#[trait_variant::make(Broker: Send)]
pub trait LocalBroker {
    /// Transmit an encoded message
    ///
    /// # Errors
    /// `TransportError` when the broker is unreachable or refuses the message
    async fn send(
        &self,
        destination: &DestinationName,
        body: Bytes,
        headers: Headers,
    ) -> Result<SendReceipt, TransportError>;

    /// Open a subscription on a destination
    async fn subscribe(&self, destination: &DestinationName)
        -> Result<Subscription, TransportError>;

    /// Positive acknowledgement: the message is consumed
    async fn ack(&self, handle: AckHandle) -> Result<(), TransportError>;

    /// Negative acknowledgement: the broker decides on redelivery or dead-lettering
    async fn nack(&self, handle: AckHandle, reason: NackReason) -> Result<(), TransportError>;
}

/// Lazy, non-restartable stream of deliveries for one destination
#[derive(Debug)]
pub struct Subscription {
    destination: DestinationName,
    rx: async_channel::Receiver<Delivery>,
}

impl Subscription {
    pub fn new(destination: DestinationName, rx: async_channel::Receiver<Delivery>) -> Self {
        Self { destination, rx }
    }

    pub fn destination(&self) -> &DestinationName {
        &self.destination
    }

    /// Wait for the next delivery
    ///
    /// Returns `None` once the broker side has closed for good.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await.ok()
    }

    /// Number of deliveries buffered but not yet pulled
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Envelope;
    use chrono::Utc;

    fn delivery(tag: u64) -> Delivery {
        Delivery::new(
            Envelope {
                message_id: format!("m-{tag}"),
                destination: "mailbox".into(),
                body: Bytes::new(),
                headers: Headers::new(),
                redelivery_count: 0,
                timestamp: Utc::now(),
            },
            AckHandle::new(tag),
        )
    }

    #[tokio::test]
    async fn test_subscription_ends_when_sender_dropped() {
        let (tx, rx) = async_channel::unbounded();
        let mut sub = Subscription::new("mailbox".into(), rx);

        tx.send(delivery(1)).await.unwrap();
        drop(tx);

        assert_eq!(sub.next().await.map(|d| d.ack.tag()), Some(1));
        assert!(sub.next().await.is_none());
    }
}
