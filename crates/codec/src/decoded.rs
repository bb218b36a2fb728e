//! Type-erased decoded payload
//!
//! The dispatcher decodes a body before it knows which handler will run, so
//! the decoded value travels as `Arc<dyn Any>` and each handler downcasts to
//! the type it registered for.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use contracts::Payload;

/// A decoded payload together with its discriminator
#[derive(Clone)]
pub struct DecodedPayload {
    type_id: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl DecodedPayload {
    pub(crate) fn new(type_id: &'static str, value: Arc<dyn Any + Send + Sync>) -> Self {
        Self { type_id, value }
    }

    pub(crate) fn into_value(self) -> Arc<dyn Any + Send + Sync> {
        self.value
    }

    /// Wrap an already-typed payload
    pub fn from_payload<P: Payload>(payload: P) -> Self {
        Self::new(P::TYPE_ID, Arc::new(payload))
    }

    /// Discriminator the payload was decoded under
    pub fn type_id(&self) -> &'static str {
        self.type_id
    }

    /// True if the payload is a `P`
    pub fn is<P: Payload>(&self) -> bool {
        self.value.is::<P>()
    }

    /// Shared, typed view of the payload
    ///
    /// Returns `None` if the payload is not a `P`.
    pub fn downcast<P: Payload>(&self) -> Option<Arc<P>> {
        Arc::clone(&self.value).downcast::<P>().ok()
    }
}

impl fmt::Debug for DecodedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedPayload")
            .field("type_id", &self.type_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u64,
    }

    impl Payload for Ping {
        const TYPE_ID: &'static str = "ping";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Pong;

    impl Payload for Pong {
        const TYPE_ID: &'static str = "pong";
    }

    #[test]
    fn test_downcast_to_registered_type() {
        let decoded = DecodedPayload::from_payload(Ping { seq: 3 });
        assert_eq!(decoded.type_id(), "ping");
        assert!(decoded.is::<Ping>());
        assert_eq!(decoded.downcast::<Ping>().as_deref(), Some(&Ping { seq: 3 }));
    }

    #[test]
    fn test_downcast_to_other_type_fails() {
        let decoded = DecodedPayload::from_payload(Ping { seq: 3 });
        assert!(!decoded.is::<Pong>());
        assert!(decoded.downcast::<Pong>().is_none());
    }
}
