//! # Codec
//!
//! Converts typed payloads to and from JSON message bodies.
//!
//! Responsibilities:
//! - Write the payload type discriminator into the `_type` header
//! - Keep a registry of payload types the receiving side can decode
//! - Reject unknown discriminators and malformed bodies with distinct errors
//!
//! # Example
//!
//! ```
//! use codec::Codec;
//! use contracts::Payload;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Ping {
//!     seq: u64,
//! }
//!
//! impl Payload for Ping {
//!     const TYPE_ID: &'static str = "ping";
//! }
//!
//! let mut codec = Codec::new();
//! codec.register::<Ping>().unwrap();
//!
//! let encoded = codec.encode(&Ping { seq: 7 }).unwrap();
//! let decoded: Ping = codec.decode_as(&encoded.body, &encoded.headers).unwrap();
//! assert_eq!(decoded, Ping { seq: 7 });
//! ```

mod codec;
mod decoded;

pub use codec::{Codec, Encoded, JSON_CONTENT_TYPE};
pub use contracts::CodecError;
pub use decoded::DecodedPayload;
