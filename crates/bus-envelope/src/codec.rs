//! # Envelope Codec
//!
//! Construction, JSON encoding and decoding. Every path that yields an
//! [`Envelope`] runs [`validate`] on the assembled JSON first.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::envelope::{Envelope, Metadata, Payload, TraceContext};
use crate::errors::{DecodeError, EnvelopeError};
use crate::validation::validate;

/// Build a validated envelope.
///
/// `sender` and a fresh `Z`-suffixed UTC `timestamp` are always stamped into
/// the header. An `id` supplied in `header_extra` is kept; otherwise a UUID v4
/// is generated.
pub fn encode(
    sender: &str,
    header_extra: Map<String, Value>,
    payload: Payload,
    metadata: Option<Metadata>,
) -> Result<Envelope, EnvelopeError> {
    let mut header = header_extra;
    header.insert("sender".to_string(), Value::String(sender.to_string()));
    header.insert("timestamp".to_string(), Value::String(now_timestamp()));
    header
        .entry("id")
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));

    let mut raw = Map::new();
    raw.insert("header".to_string(), Value::Object(header));
    raw.insert("payload".to_string(), payload.to_value());
    if let Some(metadata) = metadata {
        raw.insert("metadata".to_string(), Value::Object(metadata));
    }

    let raw = Value::Object(raw);
    validate(&raw)?;
    Envelope::from_validated(raw)
}

/// Decode raw bytes into a validated envelope.
///
/// Malformed bytes fail with [`DecodeError`] before validation runs.
pub fn decode(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
    let raw: Value = serde_json::from_slice(bytes).map_err(DecodeError::from)?;
    validate(&raw)?;
    let envelope = Envelope::from_validated(raw)?;
    debug!(
        message_id = %envelope.id(),
        message_type = %envelope.message_type(),
        "Envelope decoded"
    );
    Ok(envelope)
}

/// Serialize an envelope to JSON bytes.
pub fn encode_to_bytes(envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
    serde_json::to_vec(envelope).map_err(EnvelopeError::Serialize)
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Fluent front-end over [`encode`].
///
/// ```
/// use bus_envelope::EnvelopeBuilder;
///
/// let envelope = EnvelopeBuilder::new("agent-a", "greet")
///     .field("name", "bob")
///     .metadata("recipient", "agent-b")
///     .build()
///     .unwrap();
/// assert_eq!(envelope.message_type(), "greet");
/// ```
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    sender: String,
    payload: Payload,
    header_extra: Map<String, Value>,
    metadata: Option<Metadata>,
}

impl EnvelopeBuilder {
    /// Start an envelope of `message_type` from `sender`.
    pub fn new(sender: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self::from_payload(sender, Payload::new(message_type))
    }

    /// Start an envelope around an existing payload.
    pub fn from_payload(sender: impl Into<String>, payload: Payload) -> Self {
        Self {
            sender: sender.into(),
            payload,
            header_extra: Map::new(),
            metadata: None,
        }
    }

    /// Use a caller-chosen message ID.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.header_extra
            .insert("id".to_string(), Value::String(id.into()));
        self
    }

    /// Add an extra header key.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.header_extra.insert(key.into(), value.into());
        self
    }

    /// Carry a trace context from construction.
    #[must_use]
    pub fn trace_context(mut self, context: TraceContext) -> Self {
        let value = serde_json::to_value(context).unwrap_or(Value::Null);
        self.header_extra.insert("trace_context".to_string(), value);
        self
    }

    /// Add a payload field.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key, value);
        self
    }

    /// Set the payload correlation ID.
    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.payload.set_correlation_id(correlation_id);
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<Envelope, EnvelopeError> {
        encode(&self.sender, self.header_extra, self.payload, self.metadata)
    }
}
