//! # Governance Flows
//!
//! Policies evaluated at each end of a link:
//!
//! - Outbound deny: nothing reaches the broker, the caller gets the violation
//! - Inbound deny: the receiver drops the message before any handler runs
//! - Violation counter moves exactly once per blocked message

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bus_adapter::{
        AdapterError, DenyAll, FnPolicy, InterceptorChain, MessageTypeDenylist, PolicyDecision,
        SenderAllowlist, Target,
    };
    use bus_envelope::{Direction, Envelope, Payload};
    use bus_transport::InMemoryBroker;

    use crate::harness::{counting_handler, wait_until, TestAgent};

    #[tokio::test]
    async fn test_deny_all_inbound_blocks_every_message() {
        let broker = InMemoryBroker::new();
        let sender = TestAgent::new(&broker, "agent-a");
        let receiver =
            TestAgent::with_chain(&broker, "agent-b", InterceptorChain::new().with_policy(DenyAll));

        let calls = Arc::new(AtomicUsize::new(0));
        receiver
            .adapter
            .register_handler("ping", counting_handler(Arc::clone(&calls)));
        receiver.adapter.start().await.unwrap();
        sender.adapter.start().await.unwrap();

        for _ in 0..5 {
            sender
                .adapter
                .send(Target::agent("agent-b"), Payload::new("ping"))
                .await
                .unwrap();
        }

        assert!(
            wait_until(Duration::from_secs(1), || {
                receiver.violations("deny-all", "in") == 5
            })
            .await
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(receiver.messages("ping", "in"), 0);
        assert_eq!(sender.messages("ping", "out"), 5);

        receiver.adapter.stop().await;
        sender.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_deny_all_outbound_never_publishes() {
        let broker = InMemoryBroker::new();
        let sender =
            TestAgent::with_chain(&broker, "agent-a", InterceptorChain::new().with_policy(DenyAll));
        sender.adapter.connect().await.unwrap();

        for target in [Target::agent("agent-b"), Target::Broadcast, Target::Announcement] {
            let err = sender
                .adapter
                .send(target, Payload::new("ping"))
                .await
                .unwrap_err();
            let violation = err.as_violation().expect("policy violation");
            assert_eq!(violation.policy, "deny-all");
            assert_eq!(violation.direction, Direction::Out);
        }

        let err = sender
            .adapter
            .send_and_await(
                Target::agent("agent-b"),
                Payload::new("ping"),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Policy(_)));
        assert_eq!(sender.adapter.pending_replies().pending_count(), 0);

        assert_eq!(sender.violations("deny-all", "out"), 4);
        assert_eq!(sender.messages("ping", "out"), 0);

        sender.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_sender_allowlist_filters_peers() {
        let broker = InMemoryBroker::new();
        let trusted = TestAgent::new(&broker, "agent-a");
        let stranger = TestAgent::new(&broker, "mallory");
        let receiver = TestAgent::with_chain(
            &broker,
            "agent-b",
            InterceptorChain::new().with_policy(SenderAllowlist::new(["agent-a"])),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        receiver
            .adapter
            .register_handler("ping", counting_handler(Arc::clone(&calls)));
        receiver.adapter.start().await.unwrap();
        trusted.adapter.connect().await.unwrap();
        stranger.adapter.connect().await.unwrap();

        stranger
            .adapter
            .send(Target::agent("agent-b"), Payload::new("ping"))
            .await
            .unwrap();
        trusted
            .adapter
            .send(Target::agent("agent-b"), Payload::new("ping"))
            .await
            .unwrap();

        assert!(wait_until(Duration::from_secs(1), || calls.load(Ordering::SeqCst) == 1).await);
        assert!(
            wait_until(Duration::from_secs(1), || {
                receiver.violations("sender-allowlist", "in") == 1
            })
            .await
        );

        receiver.adapter.stop().await;
        trusted.adapter.stop().await;
        stranger.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_first_policy_to_deny_is_reported() {
        let broker = InMemoryBroker::new();
        let chain = InterceptorChain::new()
            .with_policy(MessageTypeDenylist::new(["shutdown"]))
            .with_policy(FnPolicy::new(
                "no-large-payloads",
                |envelope: &Envelope, _direction| {
                    if envelope.payload().fields().len() > 2 {
                        PolicyDecision::deny("too many fields")
                    } else {
                        PolicyDecision::Allow
                    }
                },
            ));
        let sender = TestAgent::with_chain(&broker, "agent-a", chain);
        sender.adapter.connect().await.unwrap();

        let err = sender
            .adapter
            .send(
                Target::Broadcast,
                Payload::new("shutdown")
                    .with_field("a", 1)
                    .with_field("b", 2)
                    .with_field("c", 3),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.as_violation().map(|v| v.policy.as_str()),
            Some("message-type-denylist")
        );

        let err = sender
            .adapter
            .send(
                Target::Broadcast,
                Payload::new("report")
                    .with_field("a", 1)
                    .with_field("b", 2)
                    .with_field("c", 3),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.as_violation().map(|v| v.policy.as_str()),
            Some("no-large-payloads")
        );

        sender
            .adapter
            .send(Target::Broadcast, Payload::new("report").with_field("a", 1))
            .await
            .unwrap();
        assert_eq!(sender.bridge.metrics().total_violations(), 2);

        sender.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_type_reaches_no_handler() {
        let broker = InMemoryBroker::new();
        let sender = TestAgent::new(&broker, "agent-a");
        let receiver = TestAgent::new(&broker, "agent-b");

        let calls = Arc::new(AtomicUsize::new(0));
        receiver
            .adapter
            .register_handler("ping", counting_handler(Arc::clone(&calls)));
        receiver.adapter.start().await.unwrap();
        sender.adapter.connect().await.unwrap();

        sender
            .adapter
            .send(Target::agent("agent-b"), Payload::new("pong"))
            .await
            .unwrap();

        assert!(
            wait_until(Duration::from_secs(1), || {
                receiver.messages("pong", "in") == 1
            })
            .await
        );
        // Give the dispatch worker a moment to have looked the type up
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        receiver.adapter.stop().await;
        sender.adapter.stop().await;
    }
}
