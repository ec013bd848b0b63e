//! # Error Types
//!
//! Errors raised while building, decoding or validating envelopes.

use thiserror::Error;

/// A violated envelope schema rule.
///
/// Each rule has its own variant so callers (and tests) can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("envelope must be a JSON object")]
    NotAnObject,

    #[error("envelope missing required 'header' field")]
    MissingHeader,

    #[error("header must be a JSON object")]
    HeaderNotObject,

    #[error("header missing required field: {0}")]
    MissingHeaderField(&'static str),

    #[error("header field '{0}' must be a string")]
    HeaderFieldNotString(&'static str),

    #[error("header field '{0}' must not be empty")]
    EmptyHeaderField(&'static str),

    #[error("invalid timestamp format: {0}")]
    InvalidTimestamp(String),

    #[error("trace_context must be a JSON object")]
    TraceContextNotObject,

    #[error("trace_context field '{0}' must be a string")]
    TraceFieldNotString(&'static str),

    #[error("trace_context field '{field}' must be a hex string, got {value:?}")]
    TraceFieldNotHex { field: &'static str, value: String },

    #[error("envelope missing required 'payload' field")]
    MissingPayload,

    #[error("payload must be a JSON object")]
    PayloadNotObject,

    #[error("payload missing required 'type' field")]
    MissingPayloadType,

    #[error("payload 'type' must be a string")]
    PayloadTypeNotString,

    #[error("payload 'type' must not be empty")]
    EmptyPayloadType,

    #[error("metadata must be a JSON object")]
    MetadataNotObject,
}

/// The raw bytes were not a JSON document.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope bytes: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Any failure on the envelope path.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("envelope validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to serialize envelope: {0}")]
    Serialize(serde_json::Error),
}

impl EnvelopeError {
    /// The validation rule that failed, if this is a validation error.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            EnvelopeError::Validation(e) => Some(e),
            _ => None,
        }
    }
}
