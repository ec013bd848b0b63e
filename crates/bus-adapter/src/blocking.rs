//! Thread-per-loop facade over [`BusAdapter`].
//!
//! The facade owns a multi-thread runtime. The receive loop, the dispatch
//! worker and the heartbeat run on its worker threads; every public call
//! blocks the calling thread until the async operation completes. Handlers
//! are plain closures run on the blocking pool, so they may call back into a
//! [`BlockingClient`] (including `send_and_await`) without stalling reply
//! delivery.

use std::time::Duration;

use bus_envelope::{Envelope, Payload};
use tokio::runtime::{Builder, Handle, Runtime};

use crate::dispatcher::blocking_handler;
use crate::error::AdapterError;
use crate::service::{BusAdapter, BusAdapterBuilder, Target};

/// Blocking bus adapter for callers without an async runtime.
pub struct BlockingBusAdapter {
    adapter: BusAdapter,
    handle: Handle,
    // Taken on drop
    runtime: Option<Runtime>,
}

impl BlockingBusAdapter {
    /// Build the adapter and its runtime.
    pub fn new(builder: BusAdapterBuilder) -> Result<Self, AdapterError> {
        let runtime = Builder::new_multi_thread()
            .thread_name("bus-adapter")
            .enable_all()
            .build()?;

        Ok(Self {
            adapter: builder.build()?,
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// The underlying async adapter.
    pub fn adapter(&self) -> &BusAdapter {
        &self.adapter
    }

    /// Cloneable handle for sending from other threads and from handlers.
    pub fn client(&self) -> BlockingClient {
        BlockingClient {
            handle: self.handle.clone(),
            adapter: self.adapter.clone(),
        }
    }

    pub fn register_handler<F>(&self, message_type: impl Into<String>, handler: F)
    where
        F: Fn(Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.adapter
            .register_handler(message_type, blocking_handler(handler));
    }

    pub fn connect(&self) -> Result<(), AdapterError> {
        self.block_on(self.adapter.connect())
    }

    pub fn start(&self) -> Result<(), AdapterError> {
        self.block_on(self.adapter.start())
    }

    pub fn send(&self, target: Target, payload: Payload) -> Result<Envelope, AdapterError> {
        self.block_on(self.adapter.send(target, payload))
    }

    pub fn send_and_await(
        &self,
        target: Target,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Envelope, AdapterError> {
        self.block_on(self.adapter.send_and_await(target, payload, timeout))
    }

    pub fn send_and_await_payload(
        &self,
        target: Target,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, AdapterError> {
        self.block_on(
            self.adapter
                .send_and_await_payload(target, payload, timeout),
        )
    }

    pub fn request(&self, target: Target, payload: Payload) -> Result<Envelope, AdapterError> {
        self.block_on(self.adapter.request(target, payload))
    }

    pub fn reply(&self, request: &Envelope, payload: Payload) -> Result<Envelope, AdapterError> {
        self.block_on(self.adapter.reply(request, payload))
    }

    /// Stop the adapter; idempotent.
    pub fn stop(&self) {
        self.block_on(self.adapter.stop());
    }

    fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}

impl Drop for BlockingBusAdapter {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        if Handle::try_current().is_err() {
            runtime.block_on(self.adapter.stop());
        } else {
            // Dropped from async code; blocking here would panic
            self.adapter.connection().signal_shutdown();
            runtime.shutdown_background();
        }
    }
}

/// Cloneable blocking sender bound to a [`BlockingBusAdapter`]'s runtime.
///
/// Usable from plain threads and from handler closures.
#[derive(Clone)]
pub struct BlockingClient {
    handle: Handle,
    adapter: BusAdapter,
}

impl BlockingClient {
    pub fn agent_id(&self) -> &str {
        self.adapter.agent_id()
    }

    pub fn send(&self, target: Target, payload: Payload) -> Result<Envelope, AdapterError> {
        self.handle.block_on(self.adapter.send(target, payload))
    }

    pub fn send_and_await(
        &self,
        target: Target,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Envelope, AdapterError> {
        self.handle
            .block_on(self.adapter.send_and_await(target, payload, timeout))
    }

    pub fn reply(&self, request: &Envelope, payload: Payload) -> Result<Envelope, AdapterError> {
        self.handle.block_on(self.adapter.reply(request, payload))
    }
}
