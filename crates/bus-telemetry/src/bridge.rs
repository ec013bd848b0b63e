//! Observability bridge.
//!
//! The adapter talks to telemetry only through [`ObservabilityBridge`]:
//! stamping trace context on outbound envelopes, rebuilding a parent
//! context from inbound ones, and recording metric events. Every method is
//! infallible from the caller's side; telemetry problems are logged and
//! swallowed.

use std::sync::Arc;
use std::time::Duration;

use bus_envelope::{Direction, Envelope};
use tracing::warn;

use crate::context::{outbound_trace_context, RemoteContext};
use crate::metrics::BusMetrics;
use crate::TelemetryError;

/// Metric events emitted by the adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricEvent<'a> {
    /// A message crossed the boundary
    Message {
        message_type: &'a str,
        direction: Direction,
    },
    /// A handler finished
    ProcessingDuration(Duration),
    /// Connection went up or down
    ConnectionStatus(bool),
    /// Governance blocked a message
    PolicyViolation {
        policy: &'a str,
        direction: Direction,
    },
}

/// Port between the adapter and the telemetry backend.
pub trait ObservabilityBridge: Send + Sync {
    /// Stamp trace context into an outbound envelope.
    fn inject(&self, envelope: &mut Envelope);

    /// Rebuild the remote parent of an inbound envelope, if it carries one.
    fn extract(&self, envelope: &Envelope) -> Option<RemoteContext>;

    /// Record a metric event.
    fn record(&self, event: MetricEvent<'_>);

    /// Span wrapping a handler invocation.
    fn handler_span(&self, envelope: &Envelope, parent: Option<&RemoteContext>) -> tracing::Span {
        let _ = (envelope, parent);
        tracing::Span::none()
    }
}

/// Bridge that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpBridge;

impl ObservabilityBridge for NoOpBridge {
    fn inject(&self, _envelope: &mut Envelope) {}

    fn extract(&self, _envelope: &Envelope) -> Option<RemoteContext> {
        None
    }

    fn record(&self, _event: MetricEvent<'_>) {}
}

/// Bridge backed by Prometheus metrics and OpenTelemetry context.
#[derive(Clone)]
pub struct TelemetryBridge {
    metrics: Arc<BusMetrics>,
}

impl TelemetryBridge {
    /// Bridge with a fresh metric registry.
    pub fn new() -> Result<Self, TelemetryError> {
        Ok(Self::with_metrics(Arc::new(BusMetrics::new()?)))
    }

    /// Bridge recording into an existing metric set.
    pub fn with_metrics(metrics: Arc<BusMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }
}

impl ObservabilityBridge for TelemetryBridge {
    fn inject(&self, envelope: &mut Envelope) {
        let span = tracing::info_span!(
            "send_message",
            message_type = %envelope.message_type(),
            message_id = %envelope.id(),
        );
        let context = outbound_trace_context(&span);

        if let Err(e) = envelope.stamp_trace_context(context) {
            warn!(
                message_id = %envelope.id(),
                error = %e,
                "Failed to inject trace context"
            );
        }
    }

    fn extract(&self, envelope: &Envelope) -> Option<RemoteContext> {
        envelope
            .trace_context()
            .and_then(RemoteContext::from_trace_context)
    }

    fn record(&self, event: MetricEvent<'_>) {
        match event {
            MetricEvent::Message {
                message_type,
                direction,
            } => self
                .metrics
                .messages_total
                .with_label_values(&[message_type, direction.as_str()])
                .inc(),
            MetricEvent::ProcessingDuration(elapsed) => self
                .metrics
                .processing_duration
                .observe(elapsed.as_secs_f64()),
            MetricEvent::ConnectionStatus(up) => {
                self.metrics.connection_status.set(i64::from(up))
            }
            MetricEvent::PolicyViolation { policy, direction } => self
                .metrics
                .policy_violations
                .with_label_values(&[policy, direction.as_str()])
                .inc(),
        }
    }

    fn handler_span(&self, envelope: &Envelope, parent: Option<&RemoteContext>) -> tracing::Span {
        match parent {
            Some(remote) => remote.child_span(envelope.message_type()),
            None => tracing::info_span!(
                "handle_message",
                message_type = %envelope.message_type(),
            ),
        }
    }
}
