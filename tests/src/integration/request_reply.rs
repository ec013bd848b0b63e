//! # Request/Reply Flows
//!
//! Two agents on one broker exchanging correlated messages:
//!
//! 1. **greet**: A asks B, B's handler replies, A's waiter resolves
//! 2. **Correlation short-circuit**: replies never reach A's type handlers
//! 3. **Timeout**: an absent or slow peer fails the wait and the late reply
//!    is dropped
//! 4. **Blocking facade**: the same exchange from plain threads

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bus_adapter::{AdapterError, BlockingBusAdapter, BusAdapter, Target};
    use bus_envelope::Payload;
    use bus_transport::InMemoryBroker;
    use futures::future::join_all;
    use tokio::time::Instant;

    use crate::harness::{counting_handler, fast_config, greeter, wait_until, TestAgent};

    // =============================================================================
    // CORRELATED EXCHANGE
    // =============================================================================

    #[tokio::test]
    async fn test_greet_round_trip() {
        let broker = InMemoryBroker::new();
        let a = TestAgent::new(&broker, "agent-a");
        let b = TestAgent::new(&broker, "agent-b");

        b.adapter
            .register_handler("greet", greeter(b.adapter.clone(), Duration::ZERO));
        b.adapter.start().await.unwrap();
        a.adapter.start().await.unwrap();

        let reply = a
            .adapter
            .send_and_await(
                Target::agent("agent-b"),
                Payload::new("greet").with_field("name", "bob"),
                Duration::from_secs(2),
            )
            .await
            .expect("reply from agent-b");

        assert_eq!(reply.message_type(), "greet-reply");
        assert_eq!(reply.sender(), "agent-b");
        assert_eq!(
            reply.payload().get("greeting"),
            Some(&serde_json::json!("hello bob"))
        );
        assert_eq!(a.adapter.pending_replies().pending_count(), 0);
        assert_eq!(b.messages("greet", "in"), 1);

        a.adapter.stop().await;
        b.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_reply_skips_type_handler() {
        let broker = InMemoryBroker::new();
        let a = TestAgent::new(&broker, "agent-a");
        let b = TestAgent::new(&broker, "agent-b");

        let reply_handler_calls = Arc::new(AtomicUsize::new(0));
        a.adapter.register_handler(
            "greet-reply",
            counting_handler(Arc::clone(&reply_handler_calls)),
        );
        b.adapter
            .register_handler("greet", greeter(b.adapter.clone(), Duration::ZERO));
        b.adapter.start().await.unwrap();
        a.adapter.start().await.unwrap();

        a.adapter
            .request(Target::agent("agent-b"), Payload::new("greet"))
            .await
            .unwrap();

        // Uncorrelated greet-reply still reaches the handler
        b.adapter
            .send(Target::agent("agent-a"), Payload::new("greet-reply"))
            .await
            .unwrap();
        assert!(
            wait_until(Duration::from_secs(1), || {
                reply_handler_calls.load(Ordering::SeqCst) == 1
            })
            .await
        );
        assert_eq!(reply_handler_calls.load(Ordering::SeqCst), 1);

        a.adapter.stop().await;
        b.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_resolve_independently() {
        let broker = InMemoryBroker::new();
        let a = TestAgent::new(&broker, "agent-a");
        let b = TestAgent::new(&broker, "agent-b");

        b.adapter
            .register_handler("greet", greeter(b.adapter.clone(), Duration::ZERO));
        b.adapter.start().await.unwrap();
        a.adapter.start().await.unwrap();

        let requests = (0..16).map(|n| {
            let adapter = a.adapter.clone();
            async move {
                adapter
                    .send_and_await(
                        Target::agent("agent-b"),
                        Payload::new("greet").with_field("name", format!("peer-{n}")),
                        Duration::from_secs(2),
                    )
                    .await
            }
        });

        let replies = join_all(requests).await;
        for (n, reply) in replies.into_iter().enumerate() {
            let reply = reply.unwrap();
            assert_eq!(
                reply.payload().get("greeting"),
                Some(&serde_json::json!(format!("hello peer-{n}")))
            );
        }
        let stats = a.adapter.pending_replies().stats();
        assert_eq!(stats.total_completed.load(Ordering::Relaxed), 16);

        a.adapter.stop().await;
        b.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_handler_can_await_reply_from_third_agent() {
        let broker = InMemoryBroker::new();
        let a = TestAgent::new(&broker, "agent-a");
        let b = TestAgent::new(&broker, "agent-b");
        let c = TestAgent::new(&broker, "agent-c");

        c.adapter
            .register_handler("greet", greeter(c.adapter.clone(), Duration::ZERO));

        // B forwards the question to C and relays C's answer
        let relay = b.adapter.clone();
        b.adapter.register_handler(
            "greet",
            bus_adapter::handler_fn(move |request| {
                let relay = relay.clone();
                async move {
                    let answer = relay
                        .send_and_await(
                            Target::agent("agent-c"),
                            Payload::new("greet").with_field("name", "relay"),
                            Duration::from_secs(1),
                        )
                        .await?;
                    let greeting = answer.payload().get("greeting").cloned();
                    relay
                        .reply(
                            &request,
                            Payload::new("greet-reply")
                                .with_field("greeting", greeting.unwrap_or_default()),
                        )
                        .await?;
                    Ok(())
                }
            }),
        );

        for agent in [&a, &b, &c] {
            agent.adapter.start().await.unwrap();
        }

        let reply = a
            .adapter
            .send_and_await(
                Target::agent("agent-b"),
                Payload::new("greet"),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(
            reply.payload().get("greeting"),
            Some(&serde_json::json!("hello relay"))
        );

        for agent in [&a, &b, &c] {
            agent.adapter.stop().await;
        }
    }

    // =============================================================================
    // TIMEOUTS AND LATE REPLIES
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_peer() {
        let broker = InMemoryBroker::new();
        let a = TestAgent::new(&broker, "agent-a");
        a.adapter.start().await.unwrap();

        let started = Instant::now();
        let err = a
            .adapter
            .send_and_await(
                Target::agent("agent-b"),
                Payload::new("greet"),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_timeout(), "unexpected error: {err}");
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(150), "took {elapsed:?}");
        assert_eq!(a.adapter.pending_replies().pending_count(), 0);

        a.adapter.stop().await;
    }

    #[tokio::test]
    async fn test_late_reply_dropped_silently() {
        let broker = InMemoryBroker::new();
        let a = TestAgent::new(&broker, "agent-a");
        let b = TestAgent::new(&broker, "agent-b");

        let reply_handler_calls = Arc::new(AtomicUsize::new(0));
        a.adapter.register_handler(
            "greet-reply",
            counting_handler(Arc::clone(&reply_handler_calls)),
        );
        b.adapter.register_handler(
            "greet",
            greeter(b.adapter.clone(), Duration::from_millis(250)),
        );
        b.adapter.start().await.unwrap();
        a.adapter.start().await.unwrap();

        let err = a
            .adapter
            .send_and_await(
                Target::agent("agent-b"),
                Payload::new("greet"),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        let AdapterError::Timeout { correlation_id, .. } = err else {
            panic!("expected timeout, got {err}");
        };
        assert!(a.adapter.pending_replies().is_expired(correlation_id.as_str()));

        let stats = a.adapter.pending_replies().stats();
        assert!(
            wait_until(Duration::from_secs(2), || {
                stats.total_late.load(Ordering::Relaxed) == 1
            })
            .await
        );
        assert_eq!(reply_handler_calls.load(Ordering::SeqCst), 0);
        assert_eq!(a.messages("greet-reply", "in"), 0);

        a.adapter.stop().await;
        b.adapter.stop().await;
    }

    // =============================================================================
    // BLOCKING FACADE
    // =============================================================================

    #[test]
    fn test_blocking_requester_async_responder() {
        let broker = InMemoryBroker::new();

        let responder_runtime = tokio::runtime::Runtime::new().unwrap();
        let responder = BusAdapter::builder(fast_config("agent-b"), Arc::new(broker.transport()))
            .build()
            .unwrap();
        responder.register_handler("greet", greeter(responder.clone(), Duration::ZERO));
        responder_runtime.block_on(responder.start()).unwrap();

        let requester = BlockingBusAdapter::new(BusAdapter::builder(
            fast_config("agent-a"),
            Arc::new(broker.transport()),
        ))
        .unwrap();
        requester.start().unwrap();

        let client = requester.client();
        let reply = std::thread::spawn(move || {
            client.send_and_await(
                Target::agent("agent-b"),
                Payload::new("greet").with_field("name", "thread"),
                Duration::from_secs(2),
            )
        })
        .join()
        .unwrap()
        .unwrap();

        assert_eq!(
            reply.payload().get("greeting"),
            Some(&serde_json::json!("hello thread"))
        );

        requester.stop();
        responder_runtime.block_on(responder.stop());
    }
}
