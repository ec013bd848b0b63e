//! Adapter error types.

use std::time::Duration;

use bus_envelope::EnvelopeError;
use bus_telemetry::TelemetryError;
use bus_transport::TransportError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::correlation::CorrelationId;
use crate::governance::PolicyViolation;

/// Errors surfaced to adapter callers.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Envelope construction or serialization failed.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Governance blocked an outbound message.
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// Broker unreachable, publish failed, or the adapter is shutting down.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No reply arrived in time.
    #[error("No reply for correlation id {correlation_id} within {timeout:?}")]
    Timeout {
        correlation_id: CorrelationId,
        timeout: Duration,
    },

    /// The pending slot was discarded before a reply arrived.
    #[error("Reply slot for correlation id {0} was dropped")]
    ReplyDropped(CorrelationId),

    /// `reply` was called for a request without a correlation id.
    #[error("Message {0} carries no correlation id")]
    MissingCorrelationId(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The blocking facade could not start its runtime.
    #[error("Failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl AdapterError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The policy violation, if governance blocked the message.
    pub fn as_violation(&self) -> Option<&PolicyViolation> {
        match self {
            Self::Policy(violation) => Some(violation),
            _ => None,
        }
    }
}
