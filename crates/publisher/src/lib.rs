//! # Publisher
//!
//! Outbound side of the bus: encode a payload, attach headers, hand it to
//! the broker. Publishing does not retry; transport failures go straight
//! back to the caller.

mod error;
mod publisher;

pub use error::PublishError;
pub use publisher::Publisher;
