//! Bus adapter service - composition root.
//!
//! ```text
//! outbound: payload ─▶ EnvelopeBuilder ─▶ policies(out) ─▶ inject trace ─▶ publish
//!
//! inbound:  stream ─▶ decode/validate ─▶ policies(in) ─▶ pending reply? ──yes──▶ waiter
//!                                                            │ no
//!                                                            ▼
//!                                                    bounded queue ─▶ dispatch worker ─▶ handler
//! ```
//!
//! The receive loop and the dispatch worker are separate tasks so a handler
//! that awaits a reply never blocks the loop that would deliver it. Both
//! process strictly one message at a time, in receive order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bus_envelope::{
    decode, encode_to_bytes, Direction, Envelope, EnvelopeBuilder, EnvelopeError, Payload,
};
use bus_telemetry::{log_envelope, MetricEvent, NoOpBridge, ObservabilityBridge};
use bus_transport::{
    channels, ConnectionManager, ConnectionState, MessageStream, Transport, TransportError,
};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AdapterConfig;
use crate::correlation::CorrelationId;
use crate::dispatcher::{Dispatcher, HandlerRegistry, MessageHandler};
use crate::error::AdapterError;
use crate::governance::{InterceptorChain, Policy};
use crate::pending::{PendingReplies, Resolution};

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// One agent's inbox; sets `metadata.recipient`.
    Agent(String),
    /// `bus:global:messages`
    Broadcast,
    /// `bus:global:announcements`
    Announcement,
}

impl Target {
    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self::Agent(agent_id.into())
    }

    pub fn channel(&self) -> String {
        match self {
            Self::Agent(agent_id) => channels::inbox(agent_id),
            Self::Broadcast => channels::MESSAGES.to_string(),
            Self::Announcement => channels::ANNOUNCEMENTS.to_string(),
        }
    }
}

/// What the receive path did with one raw message.
#[derive(Debug)]
pub enum InboundOutcome {
    /// Queued for the handler registered for its type.
    Dispatch(Envelope),
    /// Delivered to a `send_and_await` waiter.
    ReplyResolved,
    /// Reply to a request that already timed out; dropped.
    LateReply,
    /// Undecodable or invalid; dropped.
    Invalid,
    /// Blocked by governance; dropped.
    Blocked,
}

/// Builder for [`BusAdapter`].
pub struct BusAdapterBuilder {
    config: AdapterConfig,
    transport: Arc<dyn Transport>,
    chain: InterceptorChain,
    bridge: Option<Arc<dyn ObservabilityBridge>>,
}

impl BusAdapterBuilder {
    /// Append a governance policy.
    #[must_use]
    pub fn policy(mut self, policy: impl Policy + 'static) -> Self {
        self.chain.push(Arc::new(policy));
        self
    }

    /// Append a shared governance policy.
    #[must_use]
    pub fn shared_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.chain.push(policy);
        self
    }

    /// Replace the whole interceptor chain.
    #[must_use]
    pub fn chain(mut self, chain: InterceptorChain) -> Self {
        self.chain = chain;
        self
    }

    /// Telemetry sink (defaults to [`NoOpBridge`]).
    #[must_use]
    pub fn bridge(mut self, bridge: Arc<dyn ObservabilityBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn build(self) -> Result<BusAdapter, AdapterError> {
        self.config.validate()?;

        let bridge = self.bridge.unwrap_or_else(|| Arc::new(NoOpBridge));
        let connection = ConnectionManager::new(
            self.config.agent_id.clone(),
            self.transport,
            Arc::clone(&bridge),
            self.config.connection.clone(),
        );
        let registry = Arc::new(HandlerRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&bridge),
            self.config.handler_timeout,
        ));

        Ok(BusAdapter {
            inner: Arc::new(AdapterInner {
                config: self.config,
                connection,
                chain: self.chain,
                bridge,
                registry,
                dispatcher,
                pending: PendingReplies::new(),
                tasks: Mutex::new(None),
            }),
        })
    }
}

struct RunningTasks {
    receive: JoinHandle<()>,
    worker: JoinHandle<()>,
}

struct AdapterInner {
    config: AdapterConfig,
    connection: Arc<ConnectionManager>,
    chain: InterceptorChain,
    bridge: Arc<dyn ObservabilityBridge>,
    registry: Arc<HandlerRegistry>,
    dispatcher: Arc<Dispatcher>,
    pending: PendingReplies,
    tasks: Mutex<Option<RunningTasks>>,
}

/// One agent's attachment to the bus.
///
/// Cheap to clone; clones share the same connection, handlers and pending
/// replies, so handlers can capture a clone to send replies.
#[derive(Clone)]
pub struct BusAdapter {
    inner: Arc<AdapterInner>,
}

impl BusAdapter {
    pub fn builder(config: AdapterConfig, transport: Arc<dyn Transport>) -> BusAdapterBuilder {
        BusAdapterBuilder {
            config,
            transport,
            chain: InterceptorChain::new(),
            bridge: None,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.config.agent_id
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.inner.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.inner.connection
    }

    pub fn pending_replies(&self) -> &PendingReplies {
        &self.inner.pending
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    /// Whether the receive loop is running.
    pub async fn is_running(&self) -> bool {
        self.inner
            .tasks
            .lock()
            .await
            .as_ref()
            .is_some_and(|tasks| !tasks.receive.is_finished())
    }

    /// Register the handler for `message_type`. Works before or after `start`.
    pub fn register_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        let message_type = message_type.into();
        debug!(agent = %self.agent_id(), message_type = %message_type, "Handler registered");
        if self.inner.registry.register(message_type, handler).is_some() {
            debug!(agent = %self.agent_id(), "Replaced existing handler");
        }
    }

    /// Establish the connection and start the heartbeat.
    pub async fn connect(&self) -> Result<(), AdapterError> {
        self.inner.connection.connect().await?;
        Ok(())
    }

    /// Connect, subscribe and spawn the receive loop and dispatch worker.
    ///
    /// Calling `start` on a running adapter does nothing.
    pub async fn start(&self) -> Result<(), AdapterError> {
        self.connect().await?;

        let mut tasks = self.inner.tasks.lock().await;
        if tasks.is_some() {
            return Ok(());
        }

        let stream = self
            .inner
            .connection
            .subscribe(&channels::receive_channels(self.agent_id()))
            .await?;

        let (queue_tx, queue_rx) = mpsc::channel(self.inner.config.dispatch_queue_capacity);
        let worker = tokio::spawn(dispatch_worker(
            Arc::clone(&self.inner.dispatcher),
            queue_rx,
            self.inner.connection.shutdown_signal(),
        ));
        let receive = tokio::spawn(receive_loop(
            Arc::clone(&self.inner),
            stream,
            queue_tx,
            self.inner.connection.shutdown_signal(),
        ));

        *tasks = Some(RunningTasks { receive, worker });
        info!(agent = %self.agent_id(), "Adapter started");
        Ok(())
    }

    /// Send a payload.
    ///
    /// Returns the envelope as published (with ID and trace context).
    pub async fn send(&self, target: Target, payload: Payload) -> Result<Envelope, AdapterError> {
        let envelope = self.inner.build_envelope(&target, payload)?;
        self.inner.send_envelope(&target, envelope).await
    }

    /// Send a prebuilt envelope through governance, tracing and publish.
    pub async fn send_envelope(
        &self,
        target: &Target,
        envelope: Envelope,
    ) -> Result<Envelope, AdapterError> {
        self.inner.send_envelope(target, envelope).await
    }

    /// Send a request and wait for the reply carrying the same correlation ID.
    ///
    /// The pending slot is registered before publishing, so an immediate reply
    /// cannot be missed. On timeout the slot is removed and a late reply is
    /// dropped.
    pub async fn send_and_await(
        &self,
        target: Target,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Envelope, AdapterError> {
        let inner = &self.inner;
        let correlation_id = CorrelationId::new();
        let payload = payload.with_correlation_id(correlation_id.as_str());
        let envelope = inner.build_envelope(&target, payload)?;

        let mut reply = inner
            .pending
            .register(correlation_id.clone(), envelope.message_type());

        if let Err(e) = inner.send_envelope(&target, envelope).await {
            inner.pending.cancel(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, &mut reply).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(AdapterError::ReplyDropped(correlation_id)),
            Err(_) => {
                if !inner.pending.expire(&correlation_id) {
                    // Resolved between the deadline and the expiry
                    if let Ok(envelope) = reply.try_recv() {
                        return Ok(envelope);
                    }
                }
                warn!(
                    agent = %self.agent_id(),
                    correlation_id = %correlation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(AdapterError::Timeout {
                    correlation_id,
                    timeout,
                })
            }
        }
    }

    /// [`send_and_await`](Self::send_and_await), keeping only the reply payload.
    pub async fn send_and_await_payload(
        &self,
        target: Target,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, AdapterError> {
        self.send_and_await(target, payload, timeout)
            .await
            .map(Envelope::into_payload)
    }

    /// [`send_and_await`](Self::send_and_await) with the configured reply timeout.
    pub async fn request(&self, target: Target, payload: Payload) -> Result<Envelope, AdapterError> {
        self.send_and_await(target, payload, self.inner.config.reply_timeout)
            .await
    }

    /// Reply to `request`'s sender, carrying its correlation ID.
    pub async fn reply(&self, request: &Envelope, payload: Payload) -> Result<Envelope, AdapterError> {
        let correlation_id = request
            .correlation_id()
            .ok_or_else(|| AdapterError::MissingCorrelationId(request.id().to_string()))?;

        self.send(
            Target::agent(request.sender()),
            payload.with_correlation_id(correlation_id),
        )
        .await
    }

    /// Run one raw inbound message through decode, governance and correlation.
    pub fn process_inbound(&self, bytes: &[u8]) -> InboundOutcome {
        self.inner.process_inbound(bytes)
    }

    /// Stop the loops, close the transport and mark `Disconnected`.
    ///
    /// Idempotent. Returns once the receive loop and dispatch worker have
    /// exited; a handler already running finishes first, so a handler that
    /// wants to stop its own adapter must spawn the call. Pending reply
    /// waiters are left to their own timeouts.
    pub async fn stop(&self) {
        let first = self.inner.connection.signal_shutdown();

        let tasks = self.inner.tasks.lock().await.take();
        if let Some(tasks) = tasks {
            let _ = tasks.receive.await;
            let _ = tasks.worker.await;
        }

        self.inner.connection.shutdown().await;

        if first {
            // Handlers may hold adapter clones
            self.inner.registry.clear();
            info!(agent = %self.agent_id(), "Adapter stopped");
        }
    }
}

impl AdapterInner {
    fn build_envelope(&self, target: &Target, payload: Payload) -> Result<Envelope, EnvelopeError> {
        let mut builder = EnvelopeBuilder::from_payload(&self.config.agent_id, payload);
        if let Target::Agent(recipient) = target {
            builder = builder.metadata("recipient", recipient.as_str());
        }
        builder.build()
    }

    async fn send_envelope(
        &self,
        target: &Target,
        envelope: Envelope,
    ) -> Result<Envelope, AdapterError> {
        let mut envelope = match self.chain.intercept(envelope, Direction::Out) {
            Ok(envelope) => envelope,
            Err(violation) => {
                self.bridge.record(MetricEvent::PolicyViolation {
                    policy: &violation.policy,
                    direction: Direction::Out,
                });
                warn!(
                    agent = %self.config.agent_id,
                    policy = %violation.policy,
                    reason = %violation.reason,
                    "Outbound message blocked"
                );
                return Err(violation.into());
            }
        };

        self.bridge.inject(&mut envelope);
        self.bridge.record(MetricEvent::Message {
            message_type: envelope.message_type(),
            direction: Direction::Out,
        });

        let channel = target.channel();
        let bytes = encode_to_bytes(&envelope)?;
        let receivers = self.connection.publish(&channel, Bytes::from(bytes)).await?;

        debug!(
            agent = %self.config.agent_id,
            channel = %channel,
            message_id = %envelope.id(),
            message_type = %envelope.message_type(),
            receivers,
            "Message sent"
        );
        Ok(envelope)
    }

    fn process_inbound(&self, bytes: &[u8]) -> InboundOutcome {
        let envelope = match decode(bytes) {
            Ok(envelope) => envelope,
            Err(EnvelopeError::Validation(e)) => {
                self.bridge.record(MetricEvent::Message {
                    message_type: "invalid",
                    direction: Direction::In,
                });
                warn!(agent = %self.config.agent_id, error = %e, "Dropping invalid envelope");
                return InboundOutcome::Invalid;
            }
            Err(e) => {
                warn!(agent = %self.config.agent_id, error = %e, "Dropping undecodable message");
                return InboundOutcome::Invalid;
            }
        };

        let envelope = match self.chain.intercept(envelope, Direction::In) {
            Ok(envelope) => envelope,
            Err(violation) => {
                self.bridge.record(MetricEvent::PolicyViolation {
                    policy: &violation.policy,
                    direction: Direction::In,
                });
                warn!(
                    agent = %self.config.agent_id,
                    policy = %violation.policy,
                    reason = %violation.reason,
                    "Inbound message blocked"
                );
                return InboundOutcome::Blocked;
            }
        };

        let envelope = match envelope.correlation_id().map(str::to_owned) {
            Some(correlation_id) => match self.pending.resolve(&correlation_id, envelope) {
                Resolution::Resolved => return InboundOutcome::ReplyResolved,
                Resolution::Late => return InboundOutcome::LateReply,
                Resolution::Unmatched(envelope) => envelope,
            },
            None => envelope,
        };

        self.bridge.record(MetricEvent::Message {
            message_type: envelope.message_type(),
            direction: Direction::In,
        });
        log_envelope!(debug, envelope, "Message received", agent = %self.config.agent_id);
        InboundOutcome::Dispatch(envelope)
    }

    /// Hand an envelope to the dispatch worker without waiting.
    ///
    /// A full queue spills into `backlog`, which holds at most
    /// `dispatch_backlog_limit` envelopes; beyond that the message is
    /// dropped. Returns `false` once the worker is gone.
    fn enqueue(
        &self,
        queue: &mpsc::Sender<Envelope>,
        backlog: &mut VecDeque<Envelope>,
        envelope: Envelope,
    ) -> bool {
        let envelope = if backlog.is_empty() {
            match queue.try_send(envelope) {
                Ok(()) => return true,
                Err(TrySendError::Closed(_)) => return false,
                Err(TrySendError::Full(envelope)) => envelope,
            }
        } else {
            envelope
        };

        if backlog.len() < self.config.dispatch_backlog_limit {
            backlog.push_back(envelope);
        } else {
            self.bridge.record(MetricEvent::Message {
                message_type: "dropped",
                direction: Direction::In,
            });
            log_envelope!(
                warn,
                envelope,
                "Dispatch backlog full, dropping message",
                agent = %self.config.agent_id
            );
        }
        true
    }

    /// Wait for the connection to come back and open a new subscription.
    async fn resubscribe(&self, shutdown: &mut watch::Receiver<bool>) -> Option<MessageStream> {
        let channels = channels::receive_channels(&self.config.agent_id);

        loop {
            if !self.connection.is_connected() {
                self.connection.mark_disconnected();
            }
            if self.connection.establish().await.is_err() {
                return None;
            }

            match self.connection.subscribe(&channels).await {
                Ok(stream) => {
                    info!(agent = %self.config.agent_id, "Resubscribed after reconnect");
                    return Some(stream);
                }
                Err(TransportError::Shutdown) => return None,
                Err(e) => {
                    warn!(agent = %self.config.agent_id, error = %e, "Resubscribe failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.connection.initial_backoff) => {}
                        _ = stopped(shutdown) => return None,
                    }
                }
            }
        }
    }
}

async fn receive_loop(
    inner: Arc<AdapterInner>,
    mut stream: MessageStream,
    queue: mpsc::Sender<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    let agent = inner.config.agent_id.clone();
    let mut backlog: VecDeque<Envelope> = VecDeque::new();
    debug!(agent = %agent, "Receive loop started");

    loop {
        // The stream is always polled so replies resolve while the worker is busy
        let item = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            permit = queue.reserve(), if !backlog.is_empty() => {
                let Ok(permit) = permit else { break };
                if let Some(envelope) = backlog.pop_front() {
                    permit.send(envelope);
                }
                continue;
            }
            item = stream.next() => item,
        };

        match item {
            Some(Ok(raw)) => {
                if let InboundOutcome::Dispatch(envelope) = inner.process_inbound(&raw.payload) {
                    if !inner.enqueue(&queue, &mut backlog, envelope) {
                        break;
                    }
                }
            }
            Some(Err(e)) => {
                warn!(agent = %agent, error = %e, "Subscription error");
                match inner.resubscribe(&mut shutdown).await {
                    Some(next) => stream = next,
                    None => break,
                }
            }
            None => {
                warn!(agent = %agent, "Subscription ended");
                match inner.resubscribe(&mut shutdown).await {
                    Some(next) => stream = next,
                    None => break,
                }
            }
        }
    }

    debug!(agent = %agent, backlog = backlog.len(), "Receive loop stopped");
}

async fn dispatch_worker(
    dispatcher: Arc<Dispatcher>,
    mut queue: mpsc::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            envelope = queue.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        dispatcher.dispatch(envelope).await;
    }
    debug!("Dispatch worker stopped");
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
