//! Type-erased message handlers

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use codec::DecodedPayload;
use contracts::{HandlerError, Payload};

/// Boxed future returned by an erased handler invocation
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

type ErasedFn = dyn Fn(DecodedPayload) -> Option<HandlerFuture> + Send + Sync;

/// A handler bound to one payload type.
///
/// Handlers run at least once per message and may run again on retry or
/// broker redelivery, so they must tolerate duplicates.
#[derive(Clone)]
pub struct Handler {
    name: Arc<str>,
    payload_type: &'static str,
    call: Arc<ErasedFn>,
}

impl Handler {
    /// Wrap an async closure over `Arc<P>`
    ///
    /// ```
    /// # use contracts::{HandlerError, Payload};
    /// # use dispatcher::Handler;
    /// # use serde::{Deserialize, Serialize};
    /// # use std::sync::Arc;
    /// #[derive(Debug, Serialize, Deserialize)]
    /// struct Ping {
    ///     seq: u64,
    /// }
    ///
    /// impl Payload for Ping {
    ///     const TYPE_ID: &'static str = "ping";
    /// }
    ///
    /// let handler = Handler::new("pinger", |ping: Arc<Ping>| async move {
    ///     if ping.seq == 0 {
    ///         return Err(HandlerError::new("seq starts at 1"));
    ///     }
    ///     Ok(())
    /// });
    /// assert_eq!(handler.payload_type(), "ping");
    /// ```
    pub fn new<P, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        P: Payload,
        F: Fn(Arc<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let call = move |payload: DecodedPayload| {
            payload
                .downcast::<P>()
                .map(|typed| Box::pin(f(typed)) as HandlerFuture)
        };
        Self {
            name: Arc::from(name.into()),
            payload_type: P::TYPE_ID,
            call: Arc::new(call),
        }
    }

    /// Wrap a synchronous closure
    pub fn sync<P, F>(name: impl Into<String>, f: F) -> Self
    where
        P: Payload,
        F: Fn(&P) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(name, move |payload: Arc<P>| {
            let f = Arc::clone(&f);
            async move { f(&payload) }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Discriminator of the payload type this handler accepts
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// False means the handler opts out of this message
    pub fn accepts(&self, payload: &DecodedPayload) -> bool {
        payload.type_id() == self.payload_type
    }

    /// Start one invocation; `None` if the payload is not the handler's type
    pub(crate) fn invoke(&self, payload: DecodedPayload) -> Option<HandlerFuture> {
        (self.call)(payload)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("payload_type", &self.payload_type)
            .finish_non_exhaustive()
    }
}
