//! JSON codec with a header-borne type discriminator

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use contracts::{CodecError, Headers, Payload, CONTENT_TYPE_HEADER, TYPE_HEADER};
use tracing::debug;

use crate::DecodedPayload;

/// Media type written into the `content-type` header
pub const JSON_CONTENT_TYPE: &str = "application/json";

type DecodeFn = fn(&[u8]) -> Result<Arc<dyn Any + Send + Sync>, serde_json::Error>;

struct TypeEntry {
    rust_type: TypeId,
    rust_name: &'static str,
    decode: DecodeFn,
}

fn decode_erased<P: Payload>(body: &[u8]) -> Result<Arc<dyn Any + Send + Sync>, serde_json::Error> {
    let payload: P = serde_json::from_slice(body)?;
    Ok(Arc::new(payload))
}

/// Encoded message body plus the headers the codec generated
#[derive(Debug, Clone)]
pub struct Encoded {
    pub body: Bytes,
    pub headers: Headers,
}

/// Payload codec
///
/// Built once at startup (registration needs `&mut self`) and then shared
/// read-only between publisher and dispatcher behind an `Arc`.
#[derive(Default)]
pub struct Codec {
    types: HashMap<&'static str, TypeEntry>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `P` so messages carrying `P::TYPE_ID` can be decoded.
    ///
    /// Registering the same Rust type twice is a no-op.
    ///
    /// # Errors
    /// `DuplicateType` if a different Rust type already uses the discriminator
    pub fn register<P: Payload>(&mut self) -> Result<(), CodecError> {
        let rust_type = TypeId::of::<P>();
        if let Some(existing) = self.types.get(P::TYPE_ID) {
            if existing.rust_type == rust_type {
                return Ok(());
            }
            return Err(CodecError::DuplicateType {
                type_id: P::TYPE_ID.to_string(),
            });
        }

        self.types.insert(
            P::TYPE_ID,
            TypeEntry {
                rust_type,
                rust_name: std::any::type_name::<P>(),
                decode: decode_erased::<P>,
            },
        );
        debug!(
            type_id = P::TYPE_ID,
            rust_type = std::any::type_name::<P>(),
            "payload type registered"
        );
        Ok(())
    }

    /// Register `P` and prove `sample` survives encode + decode unchanged.
    ///
    /// Types that do not round-trip (skipped fields, lossy floats, custom
    /// serializers) are rejected here instead of failing on live traffic.
    ///
    /// # Errors
    /// `DuplicateType`, `Encode`, a decode error, or `RoundTrip`
    pub fn register_checked<P: Payload + PartialEq>(&mut self, sample: &P) -> Result<(), CodecError> {
        let newly_registered = !self.is_registered(P::TYPE_ID);
        self.register::<P>()?;

        let result = self.probe(sample);
        if result.is_err() && newly_registered {
            self.types.remove(P::TYPE_ID);
        }
        result
    }

    fn probe<P: Payload + PartialEq>(&self, sample: &P) -> Result<(), CodecError> {
        let encoded = self.encode(sample)?;
        let decoded: P = self.decode_as(&encoded.body, &encoded.headers)?;
        if &decoded != sample {
            return Err(CodecError::RoundTrip {
                type_id: P::TYPE_ID.to_string(),
            });
        }
        Ok(())
    }

    /// True if the discriminator is known
    pub fn is_registered(&self, type_id: &str) -> bool {
        self.types.contains_key(type_id)
    }

    /// Registered discriminators with their Rust type names, sorted
    pub fn registered_types(&self) -> Vec<(&'static str, &'static str)> {
        let mut types: Vec<_> = self
            .types
            .iter()
            .map(|(type_id, entry)| (*type_id, entry.rust_name))
            .collect();
        types.sort_unstable();
        types
    }

    /// Serialize a payload.
    ///
    /// The returned headers hold the discriminator and content type; the body
    /// holds only the payload's own fields.
    ///
    /// # Errors
    /// `Encode` if serde cannot represent the value as JSON
    pub fn encode<P: Payload>(&self, payload: &P) -> Result<Encoded, CodecError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| CodecError::encode(P::TYPE_ID, e.to_string()))?;

        let headers = Headers::new()
            .with(TYPE_HEADER, P::TYPE_ID)
            .with(CONTENT_TYPE_HEADER, JSON_CONTENT_TYPE);

        Ok(Encoded {
            body: Bytes::from(body),
            headers,
        })
    }

    /// Decode a body using the discriminator found in `headers`.
    ///
    /// # Errors
    /// - `MissingDiscriminator` if there is no `_type` header
    /// - `UnknownType` if the discriminator is not registered
    /// - `MalformedPayload` if the body does not parse as the named type
    pub fn decode(&self, body: &[u8], headers: &Headers) -> Result<DecodedPayload, CodecError> {
        let type_id = headers.type_id().ok_or(CodecError::MissingDiscriminator {
            header: TYPE_HEADER,
        })?;

        let Some((key, entry)) = self.types.get_key_value(type_id) else {
            return Err(CodecError::UnknownType {
                type_id: type_id.to_string(),
            });
        };

        if let Some(content_type) = headers.get(CONTENT_TYPE_HEADER) {
            if content_type != JSON_CONTENT_TYPE {
                return Err(CodecError::malformed(
                    type_id,
                    format!("unsupported content type '{content_type}'"),
                ));
            }
        }

        let value = (entry.decode)(body).map_err(|e| CodecError::malformed(type_id, e.to_string()))?;
        Ok(DecodedPayload::new(*key, value))
    }

    /// Decode into a concrete type.
    ///
    /// # Errors
    /// Everything `decode` returns, plus `MalformedPayload` when the message
    /// carries a different registered type
    pub fn decode_as<P: Payload>(&self, body: &[u8], headers: &Headers) -> Result<P, CodecError> {
        let decoded = self.decode(body, headers)?;
        let type_id = decoded.type_id();
        let typed = decoded.into_value().downcast::<P>().map_err(|_| {
            CodecError::malformed(type_id, format!("expected payload type '{}'", P::TYPE_ID))
        })?;
        // Freshly decoded, so this is the only reference.
        Arc::try_unwrap(typed).map_err(|_| {
            CodecError::malformed(type_id, "decoded payload unexpectedly shared")
        })
    }
}
