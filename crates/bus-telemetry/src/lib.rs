//! # Bus Telemetry
//!
//! Observability for the agent bus.
//!
//! ## Components
//!
//! - **Logs**: `tracing` with a pretty or JSON console layer
//! - **Traces**: OpenTelemetry, exported over OTLP when enabled; trace IDs
//!   travel in `header.trace_context`
//! - **Metrics**: Prometheus counters, gauge and histogram per adapter
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let telemetry = init_telemetry(TelemetryConfig::for_agent("agent-a"))?;
//!     let bridge = telemetry.bridge();
//!     // hand `bridge` to the adapter builder
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://localhost:4317` | OTLP collector |
//! | `OTEL_SERVICE_NAME` | `agent-bus` | Service name in traces |
//! | `BUS_OTLP_ENABLED` | `false` | Export spans |
//! | `BUS_LOG_LEVEL` | `info` | Log level filter |
//! | `BUS_JSON_LOGS` | `false` | JSON console output |

mod bridge;
mod config;
mod context;
mod logging;
mod metrics;
mod tracing_setup;

pub use bridge::{MetricEvent, NoOpBridge, ObservabilityBridge, TelemetryBridge};
pub use config::TelemetryConfig;
pub use context::{outbound_trace_context, RemoteContext};
pub use metrics::{names as metric_names, BusMetrics};
pub use tracing_setup::{init_tracing, TracingGuard};

use std::sync::Arc;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging, tracing and metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
/// When dropped, it flushes pending spans. With OTLP enabled this must be
/// called from inside a Tokio runtime.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let bridge = Arc::new(TelemetryBridge::new()?);
    let tracing_guard = init_tracing(&config)?;

    Ok(TelemetryGuard {
        _tracing: tracing_guard,
        bridge,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    _tracing: Option<TracingGuard>,
    bridge: Arc<TelemetryBridge>,
}

impl TelemetryGuard {
    /// Bridge wired to this process's metric registry.
    pub fn bridge(&self) -> Arc<TelemetryBridge> {
        Arc::clone(&self.bridge)
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        self.bridge.metrics()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}
