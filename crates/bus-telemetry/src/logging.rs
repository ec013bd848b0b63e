//! Structured log helpers.
//!
//! Log lines about a message carry the same three fields everywhere so they
//! can be joined with traces:
//! - `sender`: Agent that produced the envelope
//! - `message_id`: `header.id`
//! - `message_type`: `payload.type`

/// Log an event about an envelope with the standard message fields.
///
/// ```rust,ignore
/// log_envelope!(warn, envelope, "No handler registered", agent_id = %id);
/// ```
#[macro_export]
macro_rules! log_envelope {
    ($level:ident, $envelope:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            sender = %$envelope.sender(),
            message_id = %$envelope.id(),
            message_type = %$envelope.message_type(),
            $($($field)*,)?
            $msg
        )
    };
}
