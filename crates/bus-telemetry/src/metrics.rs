//! Prometheus metrics for the bus adapter.
//!
//! All metrics follow the naming convention: `bus_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: `bus_messages_total{type,direction}`, `bus_policy_violations_total{policy,direction}`
//! - **Gauge**: `bus_connection_status` (1 connected, 0 disconnected)
//! - **Histogram**: `bus_processing_duration_seconds`
//!
//! Each [`BusMetrics`] owns its registry, so several adapters in one process
//! (and parallel tests) never share counters.

use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::TelemetryError;

/// Metric family names, as exposed to scrapers.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "bus_messages_total";
    pub const PROCESSING_DURATION: &str = "bus_processing_duration_seconds";
    pub const CONNECTION_STATUS: &str = "bus_connection_status";
    pub const POLICY_VIOLATIONS: &str = "bus_policy_violations_total";
}

/// Metric set for one adapter.
pub struct BusMetrics {
    registry: Registry,

    /// Messages crossing the adapter boundary, by payload type and direction
    pub messages_total: IntCounterVec,

    /// Handler execution time
    pub processing_duration: Histogram,

    /// 1 while connected, 0 otherwise
    pub connection_status: IntGauge,

    /// Messages blocked by governance, by policy and direction
    pub policy_violations: IntCounterVec,
}

impl BusMetrics {
    /// Create and register the metric set on a fresh registry.
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let messages_total = IntCounterVec::new(
            Opts::new(names::MESSAGES_TOTAL, "Total messages by type and direction"),
            &["type", "direction"],
        )
        .map_err(metrics_error)?;

        let processing_duration = Histogram::with_opts(
            HistogramOpts::new(
                names::PROCESSING_DURATION,
                "Time spent processing inbound messages in handlers",
            )
            .buckets(exponential_buckets(0.0005, 2.0, 16).map_err(metrics_error)?),
        )
        .map_err(metrics_error)?;

        let connection_status =
            IntGauge::new(names::CONNECTION_STATUS, "Bus connection status").map_err(metrics_error)?;

        let policy_violations = IntCounterVec::new(
            Opts::new(names::POLICY_VIOLATIONS, "Messages blocked by governance policy"),
            &["policy", "direction"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(messages_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(processing_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(connection_status.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(policy_violations.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            messages_total,
            processing_duration,
            connection_status,
            policy_violations,
        })
    }

    /// The registry backing this metric set.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
    }

    /// Current `bus_messages_total` value for one label pair.
    pub fn messages(&self, message_type: &str, direction: &str) -> u64 {
        self.messages_total
            .with_label_values(&[message_type, direction])
            .get()
    }

    /// Current `bus_policy_violations_total` value for one label pair.
    pub fn violations(&self, policy: &str, direction: &str) -> u64 {
        self.policy_violations
            .with_label_values(&[policy, direction])
            .get()
    }

    /// Sum of `bus_policy_violations_total` across all labels.
    pub fn total_violations(&self) -> u64 {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == names::POLICY_VIOLATIONS)
            .flat_map(|family| family.get_metric())
            .map(|metric| metric.get_counter().get_value() as u64)
            .sum()
    }

    /// Number of handler executions observed.
    pub fn processed(&self) -> u64 {
        self.processing_duration.get_sample_count()
    }
}

fn metrics_error(e: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsInit(e.to_string())
}
