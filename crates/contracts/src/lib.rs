//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the bus.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Delivery model
//! - Messages travel as [`Envelope`]s: opaque body + string headers
//! - The type discriminator lives in the `_type` header, never in the body
//! - Every [`Delivery`] carries one [`AckHandle`], consumed by `ack` or `nack`

mod blueprint;
mod broker;
mod destination;
mod envelope;
mod error;
mod payload;

pub use blueprint::*;
pub use broker::{Broker, LocalBroker, Subscription};
pub use destination::DestinationName;
pub use envelope::*;
pub use error::*;
pub use payload::Payload;
