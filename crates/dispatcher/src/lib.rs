//! # Dispatcher
//!
//! Inbound side of the bus.
//!
//! Responsibilities:
//! - Keep the destination registry (configuration + handlers)
//! - Run one worker per destination, bounded by its parallelism
//! - Decode, pick handlers, retry with backoff, then ack or nack exactly once
//! - Stop within a deadline, nacking whatever is still in flight

pub mod backoff;
mod delivery;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod registry;
mod worker;

pub use delivery::Settlement;
pub use dispatcher::{
    create_dispatcher, DestinationReport, Dispatcher, DispatcherBuilder, DispatcherHandle,
    ShutdownReport,
};
pub use error::{DispatcherError, RegistryError};
pub use handler::{Handler, HandlerFuture};
pub use metrics::{DestinationMetrics, MetricsSnapshot};
pub use registry::{DestinationRegistry, Registration, RegistrationId, Registrations};
