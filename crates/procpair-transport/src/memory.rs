//! ---
//! pp_section: "02-messaging-ipc-data-model"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Broadcast transports and protocol codecs."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::trace;

use crate::transport::Counters;
use crate::{BroadcastTransport, Result, Topic, TransportError, TransportMetrics};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug)]
struct SegmentInner {
    heartbeat: broadcast::Sender<Bytes>,
    checkpoint: broadcast::Sender<Bytes>,
    dropping: Mutex<HashSet<Topic>>,
}

/// In-process stand-in for a broadcast network segment.
///
/// Every endpoint, the sender included, sees every datagram sent on a topic
/// after it was created. Receivers that fall more than the channel capacity
/// behind lose the oldest datagrams, which they count as drops.
#[derive(Debug, Clone)]
pub struct InMemorySegment {
    inner: Arc<SegmentInner>,
}

impl Default for InMemorySegment {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InMemorySegment {
    /// Create a segment with the default per-topic buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a segment buffering up to `capacity` datagrams per receiver and topic.
    pub fn with_capacity(capacity: usize) -> Self {
        let (heartbeat, _) = broadcast::channel(capacity);
        let (checkpoint, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(SegmentInner {
                heartbeat,
                checkpoint,
                dropping: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Attach a new endpoint to the segment.
    pub fn endpoint(&self) -> InMemoryTransport {
        InMemoryTransport {
            heartbeat_rx: tokio::sync::Mutex::new(self.inner.heartbeat.subscribe()),
            checkpoint_rx: tokio::sync::Mutex::new(self.inner.checkpoint.subscribe()),
            segment: self.clone(),
            counters: Counters::default(),
        }
    }

    /// Silently discard every datagram sent on `topic` while enabled.
    pub fn set_dropping(&self, topic: Topic, dropping: bool) {
        let mut guard = self.inner.dropping.lock();
        if dropping {
            guard.insert(topic);
        } else {
            guard.remove(&topic);
        }
    }

    fn is_dropping(&self, topic: Topic) -> bool {
        self.inner.dropping.lock().contains(&topic)
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Bytes> {
        match topic {
            Topic::Heartbeat => &self.inner.heartbeat,
            Topic::Checkpoint => &self.inner.checkpoint,
        }
    }
}

/// One endpoint attached to an [`InMemorySegment`].
#[derive(Debug)]
pub struct InMemoryTransport {
    segment: InMemorySegment,
    heartbeat_rx: tokio::sync::Mutex<broadcast::Receiver<Bytes>>,
    checkpoint_rx: tokio::sync::Mutex<broadcast::Receiver<Bytes>>,
    counters: Counters,
}

impl InMemoryTransport {
    fn receiver(&self, topic: Topic) -> &tokio::sync::Mutex<broadcast::Receiver<Bytes>> {
        match topic {
            Topic::Heartbeat => &self.heartbeat_rx,
            Topic::Checkpoint => &self.checkpoint_rx,
        }
    }
}

#[async_trait]
impl BroadcastTransport for InMemoryTransport {
    async fn send(&self, topic: Topic, payload: Bytes) -> Result<()> {
        self.counters.sent();
        if self.segment.is_dropping(topic) {
            trace!(%topic, "datagram lost on segment");
            return Ok(());
        }
        // No subscribers simply means nobody is listening.
        let _ = self.segment.sender(topic).send(payload);
        Ok(())
    }

    async fn recv(&self, topic: Topic) -> Result<Bytes> {
        let mut rx = self.receiver(topic).lock().await;
        loop {
            match rx.recv().await {
                Ok(payload) => {
                    self.counters.received();
                    return Ok(payload);
                }
                Err(RecvError::Lagged(skipped)) => {
                    self.counters.dropped(skipped);
                    trace!(%topic, skipped, "receiver lagged; datagrams lost");
                }
                Err(RecvError::Closed) => return Err(TransportError::Closed { topic }),
            }
        }
    }

    fn metrics(&self) -> TransportMetrics {
        self.counters.snapshot()
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::wire::{Checkpoint, CheckpointMessage, HeartbeatMessage};

    #[tokio::test]
    async fn every_endpoint_receives_broadcasts() {
        let segment = InMemorySegment::new();
        let sender = segment.endpoint();
        let listener = segment.endpoint();

        let payload = CheckpointMessage::new(Checkpoint(7)).encode();
        sender.send(Topic::Checkpoint, payload.clone()).await.unwrap();

        assert_eq!(listener.recv(Topic::Checkpoint).await.unwrap(), payload);
        assert_eq!(sender.recv(Topic::Checkpoint).await.unwrap(), payload);
        assert_eq!(sender.metrics().sent, 1);
        assert_eq!(listener.metrics().received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn topics_are_independent() {
        let segment = InMemorySegment::new();
        let sender = segment.endpoint();
        let listener = segment.endpoint();

        sender
            .send(Topic::Heartbeat, HeartbeatMessage.encode())
            .await
            .unwrap();

        let checkpoint =
            tokio::time::timeout(Duration::from_millis(50), listener.recv(Topic::Checkpoint))
                .await;
        assert!(checkpoint.is_err(), "no datagram crosses topics");
        assert!(listener.recv(Topic::Heartbeat).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_topic_loses_datagrams() {
        let segment = InMemorySegment::new();
        let sender = segment.endpoint();
        let listener = segment.endpoint();

        segment.set_dropping(Topic::Heartbeat, true);
        sender
            .send(Topic::Heartbeat, HeartbeatMessage.encode())
            .await
            .unwrap();
        let lost =
            tokio::time::timeout(Duration::from_millis(50), listener.recv(Topic::Heartbeat)).await;
        assert!(lost.is_err());

        segment.set_dropping(Topic::Heartbeat, false);
        sender
            .send(Topic::Heartbeat, HeartbeatMessage.encode())
            .await
            .unwrap();
        assert!(listener.recv(Topic::Heartbeat).await.is_ok());
    }

    #[tokio::test]
    async fn lagging_receiver_counts_losses() {
        let segment = InMemorySegment::with_capacity(2);
        let sender = segment.endpoint();
        let listener = segment.endpoint();

        for value in 0..5u64 {
            sender
                .send(Topic::Checkpoint, CheckpointMessage::new(Checkpoint(value)).encode())
                .await
                .unwrap();
        }

        let first = listener.recv(Topic::Checkpoint).await.unwrap();
        assert_eq!(
            CheckpointMessage::decode(&first).unwrap().checkpoint,
            Checkpoint(3)
        );
        assert_eq!(listener.metrics().dropped, 3);
    }
}
