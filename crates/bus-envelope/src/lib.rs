//! # Bus Envelope Crate
//!
//! The wire-level message unit exchanged by agents on the bus, as JSON:
//!
//! ```text
//! {
//!   "header":   { "sender", "timestamp", "id", "trace_context"? },
//!   "payload":  { "type", "correlation_id"?, ...fields },
//!   "metadata"? { ...string-keyed }
//! }
//! ```
//!
//! ## Design Principles
//!
//! - **Valid by construction**: an [`Envelope`] can only be obtained from
//!   [`encode`] / [`EnvelopeBuilder`] or [`decode`], both of which run
//!   [`validate`] first.
//! - **Immutable after validation**: the only in-place mutation is stamping
//!   the trace context during outbound injection.
//! - **First failure wins**: validation short-circuits and names the first
//!   violated rule as its own [`ValidationError`] variant.

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod validation;

pub use codec::{decode, encode, encode_to_bytes, EnvelopeBuilder};
pub use envelope::{Direction, Envelope, Header, Metadata, Payload, TraceContext};
pub use errors::{DecodeError, EnvelopeError, ValidationError};
pub use validation::validate;
