//! # Bus Transport - Broker Connectivity for Agents
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────┐
//! │  ConnectionManager   │  connect loop (backoff), heartbeat, state
//! └──────────┬───────────┘
//!            │ Arc<dyn Transport>
//!            ▼
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │   Transport (port)   │ ◀───── │  InMemoryTransport   │
//! └──────────────────────┘        └──────────┬───────────┘
//!                                            ▼
//!                                 ┌──────────────────────┐
//!                                 │    InMemoryBroker    │
//!                                 └──────────────────────┘
//! ```
//!
//! ## Channels
//!
//! - `bus:global:heartbeat`: liveness markers (payload = agent id)
//! - `bus:global:announcements`: broadcast, every agent subscribes
//! - `bus:global:messages`: explicit broadcast target
//! - `bus:agent:<id>:inbox`: private channel of one agent

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod backoff;
pub mod channels;
pub mod connection;
pub mod memory;
pub mod transport;

// Re-export main types
pub use backoff::Backoff;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use memory::{InMemoryBroker, InMemoryTransport};
pub use transport::{MessageStream, RawMessage, Transport, TransportError};

/// Maximum messages to buffer per subscriber before the slowest lags.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
