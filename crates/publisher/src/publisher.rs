//! Publisher - encodes payloads and sends them through the broker

use std::sync::Arc;

use codec::Codec;
use contracts::{Broker, DestinationName, Headers, Payload, SendReceipt};
use tracing::{debug, instrument, warn};

use crate::error::PublishError;

/// Typed front of a broker
pub struct Publisher<B> {
    broker: Arc<B>,
    codec: Arc<Codec>,
}

impl<B> Clone for Publisher<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            codec: Arc::clone(&self.codec),
        }
    }
}

impl<B: Broker + Sync> Publisher<B> {
    pub fn new(broker: Arc<B>, codec: Arc<Codec>) -> Self {
        Self { broker, codec }
    }

    pub fn codec(&self) -> &Arc<Codec> {
        &self.codec
    }

    /// Encode `payload` and send it to `destination`.
    ///
    /// Caller headers are sent along; on a key collision the codec's headers
    /// (`_type`, `content-type`) win.
    ///
    /// # Errors
    /// - `Encode` if the codec cannot serialize the payload
    /// - `Transport` if the broker is unavailable or rejects the message
    #[instrument(
        name = "publisher_publish",
        skip(self, destination, payload, headers),
        fields(destination = %destination.as_ref(), payload_type = P::TYPE_ID)
    )]
    pub async fn publish<P: Payload>(
        &self,
        destination: impl AsRef<str>,
        payload: &P,
        headers: Option<Headers>,
    ) -> Result<SendReceipt, PublishError> {
        let destination = DestinationName::new(destination.as_ref());

        let encoded = match self.codec.encode(payload) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "Encode failed");
                observability::record_published(&destination, false);
                return Err(e.into());
            }
        };

        let mut merged = headers.unwrap_or_default();
        merged.merge_from(&encoded.headers);

        match self.broker.send(&destination, encoded.body, merged).await {
            Ok(receipt) => {
                debug!(message_id = %receipt.message_id, "Published");
                observability::record_published(&destination, true);
                Ok(receipt)
            }
            Err(e) => {
                warn!(error = %e, "Send failed");
                observability::record_published(&destination, false);
                Err(e.into())
            }
        }
    }
}
