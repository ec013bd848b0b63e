//! Trace context propagation across the bus.
//!
//! When a message leaves an agent, the IDs of the `send_message` span are
//! stamped into `header.trace_context`. The receiving agent rebuilds a remote
//! `SpanContext` from them so its handler span becomes a child of the sender's.
//!
//! ```rust,ignore
//! // Sending side
//! let span = tracing::info_span!("send_message");
//! envelope.stamp_trace_context(outbound_trace_context(&span))?;
//!
//! // Receiving side
//! if let Some(remote) = RemoteContext::from_trace_context(ctx) {
//!     let span = remote.child_span("greet");
//!     let _guard = span.enter();
//! }
//! ```

use bus_envelope::TraceContext;
use opentelemetry::{
    trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState},
    Context,
};
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// A remote parent materialized from an inbound envelope.
#[derive(Debug, Clone)]
pub struct RemoteContext {
    span_context: SpanContext,
}

impl RemoteContext {
    /// Parse header trace IDs. `None` when either ID is missing, unparseable or all zeros.
    pub fn from_trace_context(context: &TraceContext) -> Option<Self> {
        let trace_id = TraceId::from_hex(context.trace_id.as_deref()?).ok()?;
        let span_id = SpanId::from_hex(context.span_id.as_deref()?).ok()?;

        let span_context = SpanContext::new(
            trace_id,
            span_id,
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );

        span_context.is_valid().then_some(Self { span_context })
    }

    /// Trace ID (32 hex characters).
    pub fn trace_id(&self) -> String {
        self.span_context.trace_id().to_string()
    }

    /// Remote parent span ID (16 hex characters).
    pub fn span_id(&self) -> String {
        self.span_context.span_id().to_string()
    }

    /// The underlying OpenTelemetry span context.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// OpenTelemetry context with this span as remote parent.
    pub fn to_otel_context(&self) -> Context {
        Context::new().with_remote_span_context(self.span_context.clone())
    }

    /// Create a handler span parented to this remote context.
    pub fn child_span(&self, message_type: &str) -> tracing::Span {
        let span = tracing::info_span!(
            "handle_message",
            message_type = %message_type,
            otel.trace_id = %self.span_context.trace_id(),
            otel.parent_id = %self.span_context.span_id(),
        );
        span.set_parent(self.to_otel_context());
        span
    }
}

/// IDs for an outbound message.
///
/// Uses the span's OpenTelemetry context when a tracing-opentelemetry layer
/// is installed; otherwise generates fresh IDs so peers can still correlate.
pub fn outbound_trace_context(span: &tracing::Span) -> TraceContext {
    let context = span.context();
    let current = context.span().span_context().clone();

    let (trace_id, span_id) = if current.is_valid() {
        (current.trace_id(), current.span_id())
    } else {
        let generator = RandomIdGenerator::default();
        (generator.new_trace_id(), generator.new_span_id())
    };

    TraceContext::new(trace_id.to_string(), span_id.to_string())
}
