//! # Envelope Model
//!
//! Typed view over the wire envelope.
//!
//! ## Invariants
//!
//! - `header.sender`, `header.timestamp` and `header.id` are non-empty strings.
//! - `header.timestamp` parses as ISO-8601.
//! - `header.trace_context.{trace_id,span_id}`, when present, are hex strings.
//! - `payload.type` is a non-empty string.
//! - `metadata`, when present, is a string-keyed map.
//!
//! `Envelope` deliberately has no `Deserialize` impl: the only way in is
//! through [`crate::decode`] or [`crate::encode`], which validate first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::errors::{DecodeError, EnvelopeError, ValidationError};
use crate::validation::{is_hex, parse_timestamp};

/// Free-form, string-keyed envelope metadata (`recipient`, `role`, `topic`, ...).
pub type Metadata = Map<String, Value>;

/// Which side of the adapter boundary a message is crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from the bus.
    In,
    /// Leaving for the bus.
    Out,
}

impl Direction {
    /// Label value used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distributed trace identifiers carried in the header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Trace ID (hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Parent span ID (hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    /// Vendor-specific keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TraceContext {
    /// Create a context from a trace/span ID pair.
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: Some(trace_id.into()),
            span_id: Some(span_id.into()),
            extra: Map::new(),
        }
    }

    fn check_hex(&self) -> Result<(), ValidationError> {
        for (field, value) in [("trace_id", &self.trace_id), ("span_id", &self.span_id)] {
            if let Some(value) = value {
                if !is_hex(value) {
                    return Err(ValidationError::TraceFieldNotHex {
                        field,
                        value: value.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Envelope header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    sender: String,
    timestamp: String,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_context: Option<TraceContext>,
    /// Any additional header keys supplied at construction or received on the wire.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Header {
    /// Agent ID of the sender.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// ISO-8601 creation timestamp, as sent.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Parsed creation timestamp.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    /// Unique message ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Propagated trace context, if any.
    pub fn trace_context(&self) -> Option<&TraceContext> {
        self.trace_context.as_ref()
    }

    /// Extra header keys.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// Envelope payload: a `type` discriminator plus arbitrary fields.
///
/// Payloads are plain data until they are wrapped by [`crate::encode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Payload {
    /// Key under which request/reply correlation IDs travel.
    pub const CORRELATION_ID: &'static str = "correlation_id";

    /// Create an empty payload of the given message type.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Add a field. A `type` key replaces the message type when it is a string.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Merge a map of fields.
    #[must_use]
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        for (key, value) in fields {
            self.insert(key, value);
        }
        self
    }

    /// Set the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.set_correlation_id(correlation_id);
        self
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if key == "type" {
            if let Value::String(kind) = value {
                self.kind = kind;
            }
            return;
        }
        self.fields.insert(key, value);
    }

    /// Stamp a correlation ID, replacing any previous one.
    pub fn set_correlation_id(&mut self, correlation_id: impl Into<String>) {
        self.fields.insert(
            Self::CORRELATION_ID.to_string(),
            Value::String(correlation_id.into()),
        );
    }

    /// Message type.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Correlation ID, when present and a string.
    pub fn correlation_id(&self) -> Option<&str> {
        self.fields.get(Self::CORRELATION_ID).and_then(Value::as_str)
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields except `type`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The payload as a JSON object, `type` included.
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert("type".to_string(), Value::String(self.kind.clone()));
        Value::Object(object)
    }
}

/// A validated envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    header: Header,
    payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
}

impl Envelope {
    /// Materialize an envelope from a JSON value that already passed validation.
    pub(crate) fn from_validated(raw: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut object) = raw else {
            return Err(ValidationError::NotAnObject.into());
        };

        let header = object
            .remove("header")
            .ok_or(ValidationError::MissingHeader)?;
        let payload = object
            .remove("payload")
            .ok_or(ValidationError::MissingPayload)?;
        let metadata = match object.remove("metadata") {
            Some(Value::Object(metadata)) => Some(metadata),
            Some(_) => return Err(ValidationError::MetadataNotObject.into()),
            None => None,
        };

        Ok(Self {
            header: serde_json::from_value(header).map_err(DecodeError::from)?,
            payload: serde_json::from_value(payload).map_err(DecodeError::from)?,
            metadata,
        })
    }

    /// Envelope header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Envelope payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Envelope metadata, if any.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Shorthand for `payload().kind()`.
    pub fn message_type(&self) -> &str {
        self.payload.kind()
    }

    /// Shorthand for `header().sender()`.
    pub fn sender(&self) -> &str {
        self.header.sender()
    }

    /// Shorthand for `header().id()`.
    pub fn id(&self) -> &str {
        self.header.id()
    }

    /// Shorthand for `payload().correlation_id()`.
    pub fn correlation_id(&self) -> Option<&str> {
        self.payload.correlation_id()
    }

    /// Shorthand for `header().trace_context()`.
    pub fn trace_context(&self) -> Option<&TraceContext> {
        self.header.trace_context()
    }

    /// Stamp the trace context into the header.
    ///
    /// This is the only mutation a validated envelope permits; the IDs are
    /// checked so the envelope stays valid.
    pub fn stamp_trace_context(&mut self, context: TraceContext) -> Result<(), ValidationError> {
        context.check_hex()?;
        self.header.trace_context = Some(context);
        Ok(())
    }

    /// Consume the envelope, keeping the payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// The envelope as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
