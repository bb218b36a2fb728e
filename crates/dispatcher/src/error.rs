//! Dispatcher error types
//!
//! Only fatal, worker-level failures live here. Per-message outcomes
//! (decode errors, exhausted handlers) are settled with the broker and never
//! surface as a `DispatcherError`.

use contracts::{DestinationName, TransportError};
use thiserror::Error;

/// Fatal dispatcher errors
#[derive(Debug, Clone, Error)]
pub enum DispatcherError {
    /// Subscribing to a destination failed at start
    #[error("failed to subscribe to '{destination}': {source}")]
    Subscribe {
        destination: DestinationName,
        source: TransportError,
    },

    /// The broker closed a subscription for good
    #[error("broker closed the subscription for '{destination}'")]
    BrokerClosed { destination: DestinationName },

    /// A destination worker panicked
    #[error("worker for '{destination}' panicked: {message}")]
    WorkerPanicked {
        destination: DestinationName,
        message: String,
    },

    /// Registry misuse while building the dispatcher
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl DispatcherError {
    /// True if the broker went away, as opposed to a local failure
    pub fn is_broker_failure(&self) -> bool {
        matches!(self, Self::Subscribe { .. } | Self::BrokerClosed { .. })
    }
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Handlers can only be registered on a configured destination
    #[error("destination '{destination}' is not configured")]
    UnknownDestination { destination: DestinationName },

    /// `configure` called twice for the same destination
    #[error("destination '{destination}' is already configured")]
    AlreadyConfigured { destination: DestinationName },

    /// Destinations are fixed once a dispatcher has started
    #[error("cannot configure '{destination}': the dispatcher is already running")]
    DispatcherRunning { destination: DestinationName },
}
