//! # Envelope Validation
//!
//! Schema checks run against the raw JSON value, in a fixed order:
//!
//! 1. top level is an object
//! 2. `header` present and an object
//! 3. `header.sender`, `header.timestamp`, `header.id`: present, strings, non-empty
//! 4. `header.timestamp` parses as ISO-8601
//! 5. `header.trace_context`, if present: object with hex `trace_id`/`span_id`
//! 6. `payload` present and an object
//! 7. `payload.type`: present, string, non-empty
//! 8. `metadata`, if present, is an object
//!
//! The first failing rule is returned.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::trace;

use crate::errors::ValidationError;

const REQUIRED_HEADER_FIELDS: [&str; 3] = ["sender", "timestamp", "id"];

const TRACE_FIELDS: [&str; 2] = ["trace_id", "span_id"];

/// Offset-less layouts accepted after RFC 3339 fails.
const NAIVE_LAYOUTS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Validate a raw envelope.
pub fn validate(raw: &Value) -> Result<(), ValidationError> {
    let envelope = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let header = envelope
        .get("header")
        .ok_or(ValidationError::MissingHeader)?
        .as_object()
        .ok_or(ValidationError::HeaderNotObject)?;

    for field in REQUIRED_HEADER_FIELDS {
        let value = header
            .get(field)
            .ok_or(ValidationError::MissingHeaderField(field))?
            .as_str()
            .ok_or(ValidationError::HeaderFieldNotString(field))?;
        if value.is_empty() {
            return Err(ValidationError::EmptyHeaderField(field));
        }
    }

    let timestamp = header
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if parse_timestamp(timestamp).is_none() {
        return Err(ValidationError::InvalidTimestamp(timestamp.to_string()));
    }

    if let Some(trace_context) = header.get("trace_context") {
        let trace_context = trace_context
            .as_object()
            .ok_or(ValidationError::TraceContextNotObject)?;
        for field in TRACE_FIELDS {
            let Some(value) = trace_context.get(field) else {
                continue;
            };
            let value = value
                .as_str()
                .ok_or(ValidationError::TraceFieldNotString(field))?;
            if !is_hex(value) {
                return Err(ValidationError::TraceFieldNotHex {
                    field,
                    value: value.to_string(),
                });
            }
        }
    }

    let payload = envelope
        .get("payload")
        .ok_or(ValidationError::MissingPayload)?
        .as_object()
        .ok_or(ValidationError::PayloadNotObject)?;

    let kind = payload
        .get("type")
        .ok_or(ValidationError::MissingPayloadType)?
        .as_str()
        .ok_or(ValidationError::PayloadTypeNotString)?;
    if kind.is_empty() {
        return Err(ValidationError::EmptyPayloadType);
    }

    if let Some(metadata) = envelope.get("metadata") {
        if !metadata.is_object() {
            return Err(ValidationError::MetadataNotObject);
        }
    }

    trace!(message_type = kind, "Envelope validation passed");
    Ok(())
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 (`Z` or numeric offset), offset-less date-times (read as
/// UTC) and bare dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub(crate) fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_hexdigit())
}
