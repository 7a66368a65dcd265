//! ---
//! pp_section: "02-messaging-ipc-data-model"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Broadcast transports and protocol codecs."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
//! Best-effort broadcast transport for the process pair.
//!
//! Two topics share nothing but the segment: heartbeats and checkpoints each
//! travel on their own port. Delivery is unordered, lossy, and may duplicate;
//! callers tolerate all three.
#![warn(missing_docs)]

pub mod memory;
pub mod transport;
pub mod udp;
pub mod wire;

/// Shared result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Failures surfaced by a broadcast transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A topic socket could not be created or bound. Fatal for the instance.
    #[error("unable to bind {topic} socket on port {port}: {source}")]
    Bind {
        /// Topic whose socket failed.
        topic: Topic,
        /// Port the socket was bound to.
        port: u16,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },
    /// A datagram could not be handed to the network.
    #[error("send on {topic} failed: {source}")]
    Send {
        /// Topic the datagram was destined for.
        topic: Topic,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },
    /// The transport was torn down while a receiver was waiting.
    #[error("{topic} channel closed")]
    Closed {
        /// Topic whose channel closed.
        topic: Topic,
    },
}

pub use memory::{InMemorySegment, InMemoryTransport};
pub use transport::{BroadcastTransport, Topic, TransportMetrics};
pub use udp::UdpBroadcastTransport;
pub use wire::{Checkpoint, CheckpointMessage, HeartbeatMessage, WireError};
