//! Shared fixtures for integration flows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bus_adapter::{
    handler_fn, AdapterConfig, BusAdapter, BusAdapterBuilder, InterceptorChain, MessageHandler,
};
use bus_envelope::Payload;
use bus_telemetry::TelemetryBridge;
use bus_transport::{ConnectionConfig, InMemoryBroker};

/// Config with short backoff and heartbeat so reconnect flows finish quickly.
pub fn fast_config(agent_id: &str) -> AdapterConfig {
    AdapterConfig {
        connection: ConnectionConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            heartbeat_interval: Duration::from_millis(50),
        },
        ..AdapterConfig::for_agent(agent_id)
    }
}

/// An adapter plus the metrics it reports into.
pub struct TestAgent {
    pub adapter: BusAdapter,
    pub bridge: Arc<TelemetryBridge>,
}

impl TestAgent {
    pub fn builder(broker: &Arc<InMemoryBroker>, agent_id: &str) -> (BusAdapterBuilder, Arc<TelemetryBridge>) {
        let bridge = Arc::new(TelemetryBridge::new().expect("metrics registry"));
        let builder = BusAdapter::builder(fast_config(agent_id), Arc::new(broker.transport()))
            .bridge(bridge.clone());
        (builder, bridge)
    }

    pub fn new(broker: &Arc<InMemoryBroker>, agent_id: &str) -> Self {
        Self::with_chain(broker, agent_id, InterceptorChain::new())
    }

    pub fn with_chain(broker: &Arc<InMemoryBroker>, agent_id: &str, chain: InterceptorChain) -> Self {
        let (builder, bridge) = Self::builder(broker, agent_id);
        let adapter = builder.chain(chain).build().expect("valid adapter config");
        Self { adapter, bridge }
    }

    pub fn messages(&self, message_type: &str, direction: &str) -> u64 {
        self.bridge.metrics().messages(message_type, direction)
    }

    pub fn violations(&self, policy: &str, direction: &str) -> u64 {
        self.bridge.metrics().violations(policy, direction)
    }
}

/// Handler that counts invocations.
pub fn counting_handler(count: Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
    handler_fn(move |_envelope| {
        let count = Arc::clone(&count);
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

/// Handler answering `greet {name}` with `greet-reply {greeting}`.
pub fn greeter(adapter: BusAdapter, delay: Duration) -> Arc<dyn MessageHandler> {
    handler_fn(move |request| {
        let adapter = adapter.clone();
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let name = request
                .payload()
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("stranger")
                .to_string();
            adapter
                .reply(
                    &request,
                    Payload::new("greet-reply").with_field("greeting", format!("hello {name}")),
                )
                .await?;
            Ok(())
        }
    })
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(limit, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
