//! Payload trait - application records carried in message bodies

use serde::de::DeserializeOwned;
use serde::Serialize;

/// An application-defined message record.
///
/// `TYPE_ID` is the stable discriminator written into the type header; it
/// must not change once messages of this type are in flight.
///
/// ```
/// use contracts::Payload;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping {
///     seq: u64,
/// }
///
/// impl Payload for Ping {
///     const TYPE_ID: &'static str = "ping";
/// }
/// ```
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_ID: &'static str;
}
