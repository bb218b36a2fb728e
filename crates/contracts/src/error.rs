//! Layered error definitions
//!
//! Categorized by source: config / codec / transport / handler

use std::fmt;

use thiserror::Error;

use crate::DestinationName;

/// Configuration and IO errors
#[derive(Debug, Error)]
pub enum ContractError {
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Codec errors
///
/// Everything except `Encode` is raised on the receiving side and is terminal:
/// a body that failed to decode once will fail again on every redelivery.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload could not be serialized
    #[error("failed to encode payload of type '{type_id}': {message}")]
    Encode { type_id: String, message: String },

    /// The type discriminator header is absent
    #[error("message has no '{header}' type header")]
    MissingDiscriminator { header: &'static str },

    /// The discriminator names a type this codec has not registered
    #[error("unknown payload type '{type_id}'")]
    UnknownType { type_id: String },

    /// Body does not match the shape of the named type
    #[error("malformed payload for type '{type_id}': {message}")]
    MalformedPayload { type_id: String, message: String },

    /// Another Rust type already owns this discriminator
    #[error("payload type '{type_id}' is already registered")]
    DuplicateType { type_id: String },

    /// Registration-time probe did not survive encode + decode
    #[error("payload type '{type_id}' does not round-trip through the codec")]
    RoundTrip { type_id: String },
}

impl CodecError {
    pub fn encode(type_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            type_id: type_id.into(),
            message: message.into(),
        }
    }

    pub fn malformed(type_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            type_id: type_id.into(),
            message: message.into(),
        }
    }

    /// True for errors raised while decoding an inbound message
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingDiscriminator { .. }
                | Self::UnknownType { .. }
                | Self::MalformedPayload { .. }
        )
    }
}

/// Errors reported by a broker capability
///
/// Transport failures are retried (if at all) by the broker layer, never by
/// the dispatcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Broker temporarily unreachable
    #[error("broker unavailable: {message}")]
    Unavailable { message: String },

    /// Broker refused the operation
    #[error("broker rejected message for '{destination}': {message}")]
    Rejected {
        destination: DestinationName,
        message: String,
    },

    /// Broker permanently closed
    #[error("broker is closed")]
    Closed,

    /// Ack handle does not refer to an unsettled delivery
    #[error("unknown delivery tag {tag}")]
    UnknownHandle { tag: u64 },
}

impl TransportError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn rejected(destination: impl Into<DestinationName>, message: impl Into<String>) -> Self {
        Self::Rejected {
            destination: destination.into(),
            message: message.into(),
        }
    }
}

/// Error returned by an application handler; triggers a retry
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// A handler failed on its first attempt and on every retry
#[derive(Debug, Clone, Error)]
#[error("handler on '{destination}' failed after {attempts} attempt(s): {last_error}")]
pub struct HandlerExhausted {
    pub destination: DestinationName,
    pub attempts: u32,
    pub last_error: HandlerError,
}

/// Reason attached to a negative acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NackReason {
    /// Body or discriminator could not be decoded
    DecodeError,
    /// No eligible handler and the destination dead-letters
    NoHandler,
    /// Handler failed after its whole retry budget
    HandlerExhausted,
    /// Dispatcher shut down before the outcome was known
    Shutdown,
}

impl NackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecodeError => "decode-error",
            Self::NoHandler => "no-handler",
            Self::HandlerExhausted => "handler-exhausted",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nack_reason_strings() {
        assert_eq!(NackReason::DecodeError.to_string(), "decode-error");
        assert_eq!(NackReason::NoHandler.to_string(), "no-handler");
        assert_eq!(NackReason::HandlerExhausted.to_string(), "handler-exhausted");
        assert_eq!(NackReason::Shutdown.to_string(), "shutdown");
    }

    #[test]
    fn test_decode_failure_classification() {
        assert!(CodecError::UnknownType {
            type_id: "x".into()
        }
        .is_decode_failure());
        assert!(CodecError::malformed("email", "eof").is_decode_failure());
        assert!(!CodecError::encode("email", "bad").is_decode_failure());
    }

    #[test]
    fn test_exhausted_display() {
        let err = HandlerExhausted {
            destination: "mailbox".into(),
            attempts: 4,
            last_error: HandlerError::new("smtp down"),
        };
        let text = err.to_string();
        assert!(text.contains("mailbox"), "got: {text}");
        assert!(text.contains("4 attempt"), "got: {text}");
        assert!(text.contains("smtp down"), "got: {text}");
    }
}
