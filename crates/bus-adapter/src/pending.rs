//! Pending reply table - the async-to-sync bridge for request/reply.
//!
//! Flow:
//! 1. Requester generates a [`CorrelationId`]
//! 2. Requester calls `register()` to get a oneshot receiver, *before* publishing
//! 3. Requester publishes the request carrying the ID
//! 4. Receive loop sees a reply with the same ID and calls `resolve()`
//! 5. Requester awaits the receiver or times out and calls `expire()`
//!
//! Expired IDs are remembered (bounded LRU) so a reply that arrives after its
//! waiter gave up is dropped quietly instead of reaching a type handler.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bus_envelope::Envelope;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::correlation::CorrelationId;

/// Expired IDs remembered for late-reply suppression.
pub const DEFAULT_EXPIRED_CAPACITY: usize = 1024;

/// A waiter for one reply
struct PendingReply {
    sender: oneshot::Sender<Envelope>,
    created_at: Instant,
    /// Request type (for logging)
    message_type: String,
}

/// Statistics for the pending table
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total slots registered
    pub total_registered: AtomicU64,
    /// Total replies delivered to a waiter
    pub total_completed: AtomicU64,
    /// Total waits that timed out
    pub total_timeouts: AtomicU64,
    /// Total replies dropped because their waiter had timed out
    pub total_late: AtomicU64,
    /// Total slots removed without a reply (send failed, waiter dropped)
    pub total_cancelled: AtomicU64,
}

/// What happened to an inbound message carrying a correlation ID.
#[derive(Debug)]
pub enum Resolution {
    /// Delivered to the waiter.
    Resolved,
    /// The waiter already timed out; the reply is dropped.
    Late,
    /// Nobody is waiting for this ID; the message continues to dispatch.
    Unmatched(Envelope),
}

/// Correlation ID to waiter map.
pub struct PendingReplies {
    pending: DashMap<CorrelationId, PendingReply>,
    expired: Mutex<LruCache<CorrelationId, ()>>,
    stats: PendingStats,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::with_expired_capacity(DEFAULT_EXPIRED_CAPACITY)
    }

    pub fn with_expired_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            pending: DashMap::new(),
            expired: Mutex::new(LruCache::new(capacity)),
            stats: PendingStats::default(),
        }
    }

    /// Register a waiter for `correlation_id`.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        message_type: &str,
    ) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();

        debug!(
            correlation_id = %correlation_id,
            message_type,
            "Registered pending reply"
        );

        self.pending.insert(
            correlation_id,
            PendingReply {
                sender: tx,
                created_at: Instant::now(),
                message_type: message_type.to_string(),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        rx
    }

    /// Route an inbound envelope carrying `correlation_id`.
    pub fn resolve(&self, correlation_id: &str, reply: Envelope) -> Resolution {
        if let Some((id, pending)) = self.pending.remove(correlation_id) {
            let response_time = pending.created_at.elapsed();

            return match pending.sender.send(reply) {
                Ok(()) => {
                    self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        correlation_id = %id,
                        message_type = %pending.message_type,
                        response_time_ms = response_time.as_millis() as u64,
                        "Reply delivered"
                    );
                    Resolution::Resolved
                }
                Err(_) => {
                    // Receiver was dropped (waiter gone)
                    self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                    self.expired.lock().put(id.clone(), ());
                    debug!(correlation_id = %id, "Reply waiter dropped");
                    Resolution::Late
                }
            };
        }

        if self.expired.lock().contains(correlation_id) {
            self.stats.total_late.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id, "Dropping late reply");
            return Resolution::Late;
        }

        Resolution::Unmatched(reply)
    }

    /// Remove a slot whose waiter timed out.
    ///
    /// Returns false if the slot was already resolved.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        let Some((id, pending)) = self.pending.remove(correlation_id) else {
            return false;
        };

        self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
        debug!(
            correlation_id = %id,
            message_type = %pending.message_type,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            "Pending reply expired"
        );
        self.expired.lock().put(id, ());
        true
    }

    /// Remove a slot without remembering it.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Whether `correlation_id` timed out recently.
    pub fn is_expired(&self, correlation_id: &str) -> bool {
        self.expired.lock().contains(correlation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

impl Default for PendingReplies {
    fn default() -> Self {
        Self::new()
    }
}
