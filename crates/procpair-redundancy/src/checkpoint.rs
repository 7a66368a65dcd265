//! ---
//! pp_section: "07-resilience-fault-tolerance"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Process-pair failover coordinators."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
use std::sync::Arc;

use procpair_transport::{BroadcastTransport, Checkpoint, CheckpointMessage, Topic};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Work-loop side of the hand-off to the [`CheckpointReplicator`].
#[derive(Debug, Clone)]
pub struct CheckpointHandoff {
    tx: mpsc::Sender<Checkpoint>,
}

impl CheckpointHandoff {
    /// Queue `checkpoint` for broadcast, waiting while the buffer is full.
    /// Returns `false` once the replicator is gone.
    pub async fn hand_off(&self, checkpoint: Checkpoint) -> bool {
        self.tx.send(checkpoint).await.is_ok()
    }
}

/// Primary-side broadcaster of completed checkpoints.
///
/// Each value handed over is broadcast as-is, in hand-off order. The
/// replicator drains whatever is queued and stops once every
/// [`CheckpointHandoff`] has been dropped.
pub struct CheckpointReplicator<T: ?Sized> {
    transport: Arc<T>,
    rx: mpsc::Receiver<Checkpoint>,
}

impl<T> CheckpointReplicator<T>
where
    T: BroadcastTransport + ?Sized + 'static,
{
    pub fn channel(transport: Arc<T>, capacity: usize) -> (CheckpointHandoff, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (CheckpointHandoff { tx }, Self { transport, rx })
    }

    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }

    /// Returns the number of checkpoints handed to the transport.
    pub async fn run(mut self) -> u64 {
        let mut sent = 0u64;
        while let Some(checkpoint) = self.rx.recv().await {
            let payload = CheckpointMessage::new(checkpoint).encode();
            match self.transport.send(Topic::Checkpoint, payload).await {
                Ok(()) => {
                    sent += 1;
                    trace!(%checkpoint, "checkpoint broadcast");
                }
                // Lost like any dropped datagram; the next checkpoint supersedes it.
                Err(err) => warn!(%checkpoint, error = %err, "checkpoint send failed"),
            }
        }
        debug!(sent, "checkpoint replicator drained");
        sent
    }
}

/// Backup-side shadow of the primary's checkpoint.
///
/// Last writer wins: the most recently received message overwrites the
/// shadow even if it carries a smaller value than one seen before.
#[derive(Debug)]
pub struct CheckpointListener {
    shadow: watch::Sender<Checkpoint>,
    received: u64,
    rejected: u64,
}

impl Default for CheckpointListener {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointListener {
    pub fn new() -> Self {
        let (shadow, _) = watch::channel(Checkpoint::ZERO);
        Self {
            shadow,
            received: 0,
            rejected: 0,
        }
    }

    /// Read-only view of the shadow for other tasks.
    pub fn subscribe(&self) -> watch::Receiver<Checkpoint> {
        self.shadow.subscribe()
    }

    pub fn current(&self) -> Checkpoint {
        *self.shadow.borrow()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn observe(&mut self, message: CheckpointMessage) {
        self.received += 1;
        self.shadow.send_replace(message.checkpoint);
        debug!(checkpoint = %message.checkpoint, "checkpoint is now {}", message.checkpoint);
    }

    /// Decode and apply a raw datagram. Undecodable payloads are counted and dropped.
    pub fn observe_payload(&mut self, payload: &[u8]) {
        match CheckpointMessage::decode(payload) {
            Ok(message) => self.observe(message),
            Err(err) => {
                self.rejected += 1;
                warn!(error = %err, bytes = payload.len(), "discarding malformed checkpoint");
            }
        }
    }
}
