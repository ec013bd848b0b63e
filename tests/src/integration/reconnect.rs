//! # Reconnect Flows
//!
//! Broker loss and recovery as seen by running adapters. Messages published
//! while a link is down are lost; delivery resumes once both sides have
//! reconnected and resubscribed.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bus_adapter::Target;
    use bus_envelope::Payload;
    use bus_transport::{ConnectionState, InMemoryBroker};
    use tokio::time::timeout;

    use crate::harness::{counting_handler, wait_until, TestAgent};

    /// Keep sending `ping` until the receiver has seen `expected` of them.
    async fn ping_until(sender: &TestAgent, calls: &AtomicUsize, expected: usize) -> bool {
        timeout(Duration::from_secs(5), async {
            while calls.load(Ordering::SeqCst) < expected {
                // Errors while the link is down are expected
                let _ = sender
                    .adapter
                    .send(Target::agent("agent-b"), Payload::new("ping"))
                    .await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn test_start_waits_for_broker() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let agent = TestAgent::new(&broker, "agent-a");

        let adapter = agent.adapter.clone();
        let starting = tokio::spawn(async move { adapter.start().await });

        assert!(wait_until(Duration::from_secs(1), || broker.connect_attempts() >= 3).await);
        assert_eq!(agent.adapter.connection_state(), ConnectionState::Connecting);

        broker.set_available(true);
        timeout(Duration::from_secs(2), starting)
            .await
            .expect("start finished")
            .unwrap()
            .unwrap();

        assert_eq!(agent.adapter.connection_state(), ConnectionState::Connected);
        assert_eq!(agent.bridge.metrics().connection_status.get(), 1);

        agent.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_delivery_resumes_after_connection_loss() {
        let broker = InMemoryBroker::new();
        let sender = TestAgent::new(&broker, "agent-a");
        let receiver = TestAgent::new(&broker, "agent-b");

        let calls = Arc::new(AtomicUsize::new(0));
        receiver
            .adapter
            .register_handler("ping", counting_handler(Arc::clone(&calls)));
        receiver.adapter.start().await.unwrap();
        sender.adapter.start().await.unwrap();

        assert!(ping_until(&sender, &calls, 1).await);

        broker.sever_connections();
        assert!(
            ping_until(&sender, &calls, calls.load(Ordering::SeqCst) + 1).await,
            "delivery did not resume"
        );
        assert!(receiver.adapter.is_running().await);
        assert_eq!(receiver.adapter.connection_state(), ConnectionState::Connected);

        receiver.adapter.stop().await;
        sender.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_outage_then_recovery() {
        let broker = InMemoryBroker::new();
        let sender = TestAgent::new(&broker, "agent-a");
        let receiver = TestAgent::new(&broker, "agent-b");

        let calls = Arc::new(AtomicUsize::new(0));
        receiver
            .adapter
            .register_handler("ping", counting_handler(Arc::clone(&calls)));
        receiver.adapter.start().await.unwrap();
        sender.adapter.start().await.unwrap();
        assert!(ping_until(&sender, &calls, 1).await);

        broker.set_available(false);
        assert!(
            wait_until(Duration::from_secs(1), || {
                receiver.bridge.metrics().connection_status.get() == 0
            })
            .await
        );
        assert!(sender
            .adapter
            .send(Target::agent("agent-b"), Payload::new("ping"))
            .await
            .is_err());

        broker.set_available(true);
        assert!(ping_until(&sender, &calls, calls.load(Ordering::SeqCst) + 1).await);
        assert_eq!(receiver.bridge.metrics().connection_status.get(), 1);

        receiver.adapter.stop().await;
        sender.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_stop_during_outage_is_prompt() {
        let broker = InMemoryBroker::new();
        let agent = TestAgent::new(&broker, "agent-a");
        agent.adapter.start().await.unwrap();

        broker.set_available(false);
        tokio::time::sleep(Duration::from_millis(100)).await;

        timeout(Duration::from_millis(500), agent.adapter.stop())
            .await
            .expect("stop returned while reconnecting");
        assert!(!agent.adapter.is_running().await);
        assert_eq!(agent.adapter.connection_state(), ConnectionState::Disconnected);
    }
}
