//! # Dispatcher
//!
//! Routes inbound envelopes to the handler registered for `payload.type`.
//! Each invocation runs inside a handler span parented to the sender's trace
//! and is timed into the processing-duration histogram.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use bus_envelope::Envelope;
use bus_telemetry::{log_envelope, MetricEvent, ObservabilityBridge};
use parking_lot::RwLock;
use tracing::Instrument;

/// Callback for one message type.
///
/// Errors are logged by the dispatcher; the message counts as consumed
/// either way.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        (self.0)(envelope).await
    }
}

/// Handler from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct BlockingHandler<F>(Arc<F>);

#[async_trait]
impl<F> MessageHandler for BlockingHandler<F>
where
    F: Fn(Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        let f = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || f(envelope))
            .await
            .map_err(|e| anyhow!("blocking handler panicked: {e}"))?
    }
}

/// Handler from a synchronous closure, run on the blocking thread pool.
pub fn blocking_handler<F>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(BlockingHandler(Arc::new(f)))
}

/// Message type to handler map, shared between registration and dispatch.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `message_type`, returning the one it replaces.
    pub fn register(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.write().insert(message_type.into(), handler)
    }

    pub fn unregister(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.write().remove(message_type)
    }

    pub fn get(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.read().get(message_type).cloned()
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.handlers.read().contains_key(message_type)
    }

    pub fn message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    NoHandler,
    Failed,
    TimedOut,
}

/// Invokes handlers with timing and tracing.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    bridge: Arc<dyn ObservabilityBridge>,
    handler_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        bridge: Arc<dyn ObservabilityBridge>,
        handler_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            bridge,
            handler_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub async fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        let Some(handler) = self.registry.get(envelope.message_type()) else {
            log_envelope!(warn, envelope, "No handler registered for message type");
            return DispatchOutcome::NoHandler;
        };

        let parent = self.bridge.extract(&envelope);
        let span = self.bridge.handler_span(&envelope, parent.as_ref());
        let message_id = envelope.id().to_string();
        let message_type = envelope.message_type().to_string();

        let started = Instant::now();
        let result = match self.handler_timeout {
            Some(limit) => tokio::time::timeout(limit, handler.handle(envelope))
                .instrument(span)
                .await
                .ok(),
            None => Some(handler.handle(envelope).instrument(span).await),
        };
        let elapsed = started.elapsed();
        self.bridge.record(MetricEvent::ProcessingDuration(elapsed));

        match result {
            Some(Ok(())) => {
                tracing::debug!(
                    message_id = %message_id,
                    message_type = %message_type,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Handler completed"
                );
                DispatchOutcome::Handled
            }
            Some(Err(e)) => {
                tracing::error!(
                    message_id = %message_id,
                    message_type = %message_type,
                    error = %e,
                    "Handler failed"
                );
                DispatchOutcome::Failed
            }
            None => {
                tracing::warn!(
                    message_id = %message_id,
                    message_type = %message_type,
                    timeout_ms = elapsed.as_millis() as u64,
                    "Handler timed out, abandoned"
                );
                DispatchOutcome::TimedOut
            }
        }
    }
}
