//! # Transport Port
//!
//! The pub/sub broker as seen by the adapter. Implementations deliver raw
//! bytes; envelope encoding happens above this layer.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

/// A message received from a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub channel: String,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Errors from transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The broker could not be reached.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation attempted without a live connection.
    #[error("Not connected to broker")]
    NotConnected,

    /// The broker rejected or lost a publish.
    #[error("Publish to {channel} failed: {reason}")]
    PublishFailed { channel: String, reason: String },

    /// A subscription stream was terminated by the broker.
    #[error("Subscription closed")]
    Closed,

    /// Shutdown was requested.
    #[error("Transport shutting down")]
    Shutdown,
}

/// Ordered stream of messages from one subscription.
///
/// The stream ending means the underlying connection is gone.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<RawMessage, TransportError>> + Send>>;

/// Publish/subscribe broker connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and verify liveness.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Publish bytes on a channel.
    ///
    /// # Returns
    ///
    /// The number of subscribers that received the message.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, TransportError>;

    /// Subscribe to a set of channels.
    async fn subscribe(&self, channels: &[String]) -> Result<MessageStream, TransportError>;

    /// Release the connection.
    async fn close(&self);

    /// Whether the connection is currently usable.
    fn is_connected(&self) -> bool;
}
