//! # In-Memory Broker
//!
//! Single-process pub/sub broker on `tokio::sync::broadcast`. Every
//! [`InMemoryTransport`] handed out by one [`InMemoryBroker`] sees the same
//! channels, so several adapters in one process can talk to each other.
//!
//! Connection loss is simulated with a generation counter: severing bumps the
//! generation, which ends every open subscription stream and invalidates every
//! transport's session until it reconnects.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::transport::{MessageStream, RawMessage, Transport, TransportError};
use crate::DEFAULT_CHANNEL_CAPACITY;

/// Shared broker state.
pub struct InMemoryBroker {
    /// Broadcast sender for all channels.
    sender: broadcast::Sender<RawMessage>,

    /// Bumped to drop every live session.
    generation: watch::Sender<u64>,

    /// When false, connects fail.
    available: AtomicBool,

    /// Connect attempts left to fail.
    failing_connects: AtomicU32,

    /// Total connect attempts.
    connect_attempts: AtomicU64,

    /// Total messages published.
    published: AtomicU64,

    /// Channel capacity.
    capacity: usize,
}

impl InMemoryBroker {
    /// Create a new broker with default capacity.
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new broker with specified capacity.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity);
        let (generation, _) = watch::channel(0);
        Arc::new(Self {
            sender,
            generation,
            available: AtomicBool::new(true),
            failing_connects: AtomicU32::new(0),
            connect_attempts: AtomicU64::new(0),
            published: AtomicU64::new(0),
            capacity,
        })
    }

    /// A new, disconnected transport handle on this broker.
    pub fn transport(self: &Arc<Self>) -> InMemoryTransport {
        InMemoryTransport {
            broker: Arc::clone(self),
            session: AtomicU64::new(0),
        }
    }

    /// Make the broker reachable or unreachable.
    ///
    /// Going unavailable also drops every live session.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            self.sever_connections();
        }
        debug!(available, "Broker availability changed");
    }

    /// Fail the next `count` connect attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Drop every live session and end every open subscription.
    pub fn sever_connections(&self) {
        self.generation.send_modify(|generation| *generation += 1);
        debug!("Broker severed all connections");
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of open subscription streams.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn current_generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn try_connect(&self) -> Result<u64, TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);

        if !self.is_available() {
            return Err(TransportError::ConnectionFailed(
                "broker unavailable".to_string(),
            ));
        }

        let injected = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if injected.is_ok() {
            return Err(TransportError::ConnectionFailed(
                "injected connect failure".to_string(),
            ));
        }

        Ok(self.current_generation())
    }
}

/// One connection to an [`InMemoryBroker`].
pub struct InMemoryTransport {
    broker: Arc<InMemoryBroker>,

    /// Generation + 1 of the live session, 0 when disconnected.
    session: AtomicU64,
}

impl InMemoryTransport {
    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let generation = self.broker.try_connect()?;
        self.session.store(generation + 1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.broker.published.fetch_add(1, Ordering::Relaxed);

        match self.broker.sender.send(RawMessage::new(channel, payload)) {
            Ok(receivers) => {
                debug!(channel, receivers, "Message published");
                Ok(receivers)
            }
            Err(_) => {
                // No receivers - message is dropped
                debug!(channel, "Message dropped (no receivers)");
                Ok(0)
            }
        }
    }

    async fn subscribe(&self, channels: &[String]) -> Result<MessageStream, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let receiver = self.broker.sender.subscribe();
        let mut generation = self.broker.generation.subscribe();
        let severed = async move {
            let _ = generation.changed().await;
        };

        let filter: HashSet<String> = channels.iter().cloned().collect();
        debug!(channels = ?filter, "New subscription created");

        let stream = BroadcastStream::new(receiver)
            .filter_map(move |item| {
                let item = match item {
                    Ok(message) if filter.contains(&message.channel) => Some(Ok(message)),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(count)) => {
                        warn!(lagged = count, "Subscriber lagged, some messages dropped");
                        None
                    }
                };
                future::ready(item)
            })
            .take_until(severed);

        Ok(Box::pin(stream))
    }

    async fn close(&self) {
        self.session.store(0, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        let session = self.session.load(Ordering::SeqCst);
        session != 0
            && session == self.broker.current_generation() + 1
            && self.broker.is_available()
    }
}
