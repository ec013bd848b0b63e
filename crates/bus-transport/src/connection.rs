//! # Connection Manager
//!
//! Owns the broker connection for one agent.
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!      ▲                        │   ▲                │
//!      │                        └───┘ backoff        │ publish / heartbeat error
//!      └─────────────────────────────────────────────┘
//! ```
//!
//! The connect loop retries forever with exponential backoff until it
//! succeeds or shutdown is signalled. Once connected, a heartbeat task
//! publishes the agent ID on [`channels::HEARTBEAT`] every interval and
//! re-enters the connect loop when a heartbeat fails. Concurrent reconnects
//! (heartbeat task and receive loop) are serialized; the second caller finds
//! the connection already up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bus_telemetry::{MetricEvent, ObservabilityBridge};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::channels;
use crate::transport::{MessageStream, Transport, TransportError};

/// Connection lifecycle timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// First reconnect delay
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Reconnect delay cap
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Interval between liveness markers
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

/// Connection state as seen by the heartbeat and receive loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connection lifecycle for one agent.
pub struct ConnectionManager {
    agent_id: String,
    transport: Arc<dyn Transport>,
    bridge: Arc<dyn ObservabilityBridge>,
    config: ConnectionConfig,

    state: watch::Sender<ConnectionState>,
    backoff: Mutex<Backoff>,

    /// Serializes connect loops.
    establish_lock: tokio::sync::Mutex<()>,

    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        agent_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        bridge: Arc<dyn ObservabilityBridge>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        let backoff = Backoff::new(config.initial_backoff, config.max_backoff);

        Arc::new(Self {
            agent_id: agent_id.into(),
            transport,
            bridge,
            config,
            state,
            backoff: Mutex::new(backoff),
            establish_lock: tokio::sync::Mutex::new(()),
            shutdown,
            closed: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.transport.is_connected()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether shutdown has been signalled.
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver that flips to `true` on shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Connect, then start the heartbeat task if it is not running.
    pub async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        self.establish().await?;
        self.spawn_heartbeat();
        Ok(())
    }

    /// Run the connect loop until connected.
    ///
    /// Returns immediately when the connection is already up. Only fails with
    /// [`TransportError::Shutdown`].
    pub async fn establish(&self) -> Result<(), TransportError> {
        let _guard = self.establish_lock.lock().await;
        let mut shutdown = self.shutdown.subscribe();

        if *shutdown.borrow() {
            return Err(TransportError::Shutdown);
        }
        if self.is_connected() {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.transport.connect().await {
                Ok(()) => {
                    self.backoff.lock().reset();
                    self.set_state(ConnectionState::Connected);
                    self.bridge.record(MetricEvent::ConnectionStatus(true));
                    info!(agent = %self.agent_id, attempt, "Connected to bus");
                    return Ok(());
                }
                Err(e) => {
                    self.bridge.record(MetricEvent::ConnectionStatus(false));
                    let delay = self.backoff.lock().next_delay();
                    warn!(
                        agent = %self.agent_id,
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Connection attempt failed"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stopped(&mut shutdown) => {
                            self.set_state(ConnectionState::Disconnected);
                            return Err(TransportError::Shutdown);
                        }
                    }
                }
            }
        }
    }

    /// Publish raw bytes on a channel.
    pub async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, TransportError> {
        if self.is_shut_down() {
            return Err(TransportError::Shutdown);
        }

        let result = self.transport.publish(channel, payload).await;
        if result.is_err() && !self.transport.is_connected() {
            self.mark_disconnected();
        }
        result
    }

    /// Subscribe to raw messages on `channels`.
    pub async fn subscribe(&self, channels: &[String]) -> Result<MessageStream, TransportError> {
        if self.is_shut_down() {
            return Err(TransportError::Shutdown);
        }
        self.transport.subscribe(channels).await
    }

    /// Record a lost connection.
    pub fn mark_disconnected(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                false
            } else {
                *state = ConnectionState::Disconnected;
                true
            }
        });
        if changed {
            self.bridge.record(MetricEvent::ConnectionStatus(false));
            warn!(agent = %self.agent_id, "Connection lost");
        }
    }

    /// Signal shutdown without waiting. Returns `false` if already signalled.
    pub fn signal_shutdown(&self) -> bool {
        self.shutdown.send_if_modified(|stop| {
            if *stop {
                false
            } else {
                *stop = true;
                true
            }
        })
    }

    /// Stop the heartbeat, close the transport and mark `Disconnected`.
    ///
    /// Idempotent. Interrupts a connect loop that is sleeping on backoff.
    pub async fn shutdown(&self) {
        self.signal_shutdown();

        let heartbeat = self.heartbeat.lock().take();
        if let Some(handle) = heartbeat {
            let _ = handle.await;
        }

        if !self.closed.swap(true, Ordering::SeqCst) {
            self.transport.close().await;
            self.set_state(ConnectionState::Disconnected);
            self.bridge.record(MetricEvent::ConnectionStatus(false));
            info!(agent = %self.agent_id, "Connection closed");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let mut slot = self.heartbeat.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let manager = Arc::clone(self);
        *slot = Some(tokio::spawn(async move { manager.heartbeat_loop().await }));
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.config.heartbeat_interval;
        debug!(
            agent = %self.agent_id,
            interval_ms = interval.as_millis() as u64,
            "Heartbeat loop started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stopped(&mut shutdown) => break,
            }

            let marker = Bytes::from(self.agent_id.clone());
            match self.transport.publish(channels::HEARTBEAT, marker).await {
                Ok(_) => {
                    self.bridge.record(MetricEvent::ConnectionStatus(true));
                    debug!(agent = %self.agent_id, "Heartbeat sent");
                }
                Err(e) => {
                    warn!(agent = %self.agent_id, error = %e, "Heartbeat failed, reconnecting");
                    self.mark_disconnected();
                    if self.establish().await.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(agent = %self.agent_id, "Heartbeat loop stopped");
    }
}

/// Resolves once `shutdown` is `true` or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
