//! # Observability Flows
//!
//! Trace context stamped by the sender is visible to the receiver's handler,
//! and each adapter's Prometheus registry reflects the traffic it saw.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bus_adapter::{handler_fn, Target};
    use bus_envelope::{Payload, TraceContext};
    use bus_telemetry::{metric_names, RemoteContext};
    use bus_transport::InMemoryBroker;
    use parking_lot::Mutex;

    use crate::harness::{wait_until, TestAgent};

    #[tokio::test]
    async fn test_trace_context_propagates_to_handler() {
        let broker = InMemoryBroker::new();
        let sender = TestAgent::new(&broker, "agent-a");
        let receiver = TestAgent::new(&broker, "agent-b");

        let seen: Arc<Mutex<Option<TraceContext>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        receiver.adapter.register_handler(
            "ping",
            handler_fn(move |envelope| {
                let slot = Arc::clone(&slot);
                async move {
                    *slot.lock() = envelope.trace_context().cloned();
                    Ok(())
                }
            }),
        );
        receiver.adapter.start().await.unwrap();
        sender.adapter.connect().await.unwrap();

        let sent = sender
            .adapter
            .send(Target::agent("agent-b"), Payload::new("ping"))
            .await
            .unwrap();
        let stamped = sent.trace_context().cloned().expect("trace context injected");

        assert!(wait_until(Duration::from_secs(1), || seen.lock().is_some()).await);
        let received = seen.lock().clone().unwrap();
        assert_eq!(received, stamped);

        let remote = RemoteContext::from_trace_context(&received).expect("valid remote context");
        assert_eq!(Some(remote.trace_id()), received.trace_id);
        assert_eq!(Some(remote.span_id()), received.span_id);

        receiver.adapter.stop().await;
        sender.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_metrics_reflect_exchange() {
        let broker = InMemoryBroker::new();
        let sender = TestAgent::new(&broker, "agent-a");
        let receiver = TestAgent::new(&broker, "agent-b");

        receiver
            .adapter
            .register_handler("ping", handler_fn(|_envelope| async { Ok(()) }));
        receiver.adapter.start().await.unwrap();
        sender.adapter.connect().await.unwrap();

        for _ in 0..3 {
            sender
                .adapter
                .send(Target::agent("agent-b"), Payload::new("ping"))
                .await
                .unwrap();
        }

        assert!(
            wait_until(Duration::from_secs(1), || {
                receiver.bridge.metrics().processed() == 3
            })
            .await
        );
        assert_eq!(receiver.messages("ping", "in"), 3);
        assert_eq!(sender.messages("ping", "out"), 3);
        assert_eq!(receiver.bridge.metrics().connection_status.get(), 1);

        let exposition = receiver.bridge.metrics().encode().unwrap();
        assert!(exposition.contains(metric_names::MESSAGES_TOTAL));
        assert!(exposition.contains(metric_names::PROCESSING_DURATION));
        assert!(exposition.contains(r#"type="ping""#));

        receiver.adapter.stop().await;
        sender.adapter.stop().await;
        assert_eq!(receiver.bridge.metrics().connection_status.get(), 0);
    }
}
