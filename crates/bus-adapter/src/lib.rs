//! # Bus Adapter
//!
//! Attaches one agent to the message bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         BusAdapter                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  send / send_and_await / reply                                  │
//! │        │                                                        │
//! │        ▼                                                        │
//! │  InterceptorChain(out) → ObservabilityBridge::inject → publish  │
//! │                                                                 │
//! │  receive loop                                                   │
//! │        │ decode + validate                                      │
//! │        ▼                                                        │
//! │  InterceptorChain(in) → PendingReplies ─(match)─▶ waiter        │
//! │        │ (no match)                                             │
//! │        ▼                                                        │
//! │  dispatch worker → HandlerRegistry[payload.type]                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ConnectionManager: backoff connect loop + heartbeat            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use bus_adapter::{handler_fn, AdapterConfig, BusAdapter, Target};
//! use bus_envelope::Payload;
//! use bus_transport::InMemoryBroker;
//!
//! let broker = InMemoryBroker::new();
//! let adapter = BusAdapter::builder(AdapterConfig::for_agent("agent-b"), Arc::new(broker.transport()))
//!     .policy(SenderAllowlist::new(["agent-a"]))
//!     .build()?;
//!
//! let replier = adapter.clone();
//! adapter.register_handler("greet", handler_fn(move |request| {
//!     let replier = replier.clone();
//!     async move {
//!         replier.reply(&request, Payload::new("greet-reply")).await?;
//!         Ok(())
//!     }
//! }));
//! adapter.start().await?;
//! ```
//!
//! ## Delivery
//!
//! At-most-once. Invalid, blocked, unhandled and late messages are logged
//! and dropped; nothing is retried or redelivered.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod blocking;
pub mod config;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod governance;
pub mod pending;
pub mod service;

pub use blocking::{BlockingBusAdapter, BlockingClient};
pub use config::{AdapterConfig, ConfigError};
pub use correlation::CorrelationId;
pub use dispatcher::{
    blocking_handler, handler_fn, DispatchOutcome, Dispatcher, HandlerRegistry, MessageHandler,
};
pub use error::AdapterError;
pub use governance::{
    DenyAll, FnPolicy, InterceptorChain, MessageTypeDenylist, Policy, PolicyDecision,
    PolicyViolation, SenderAllowlist,
};
pub use pending::{PendingReplies, PendingStats, Resolution};
pub use service::{BusAdapter, BusAdapterBuilder, InboundOutcome, Target};
