//! ---
//! pp_section: "02-messaging-ipc-data-model"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Broadcast transports and protocol codecs."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use strum::Display;

use crate::Result;

/// Independent broadcast channels, one per message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Topic {
    /// Liveness signals from the primary.
    Heartbeat,
    /// Progress announcements from the primary.
    Checkpoint,
}

/// Best-effort datagram broadcast.
///
/// `send` never waits for delivery and reports only local failures. `recv`
/// suspends until a datagram arrives on the topic and must be cancel-safe, so
/// callers can race it against timers.
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    /// Broadcast `payload` on `topic`.
    async fn send(&self, topic: Topic, payload: Bytes) -> Result<()>;
    /// Wait for the next datagram on `topic`.
    async fn recv(&self, topic: Topic) -> Result<Bytes>;
    /// Snapshot of the transport counters.
    fn metrics(&self) -> TransportMetrics;
    /// Human-readable transport name for logging.
    fn name(&self) -> &'static str;
}

/// Snapshot of transport counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportMetrics {
    /// Datagrams handed to the network.
    pub sent: u64,
    /// Datagrams delivered to callers of `recv`.
    pub received: u64,
    /// Sends that failed locally.
    pub send_failures: u64,
    /// Datagrams known to be lost before reaching `recv`.
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    send_failures: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransportMetrics {
        TransportMetrics {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
