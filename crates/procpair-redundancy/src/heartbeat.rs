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
use std::time::Duration;

use procpair_transport::{BroadcastTransport, HeartbeatMessage, Topic};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::role::RoleCell;

/// Backup-side liveness tracking for the primary.
///
/// The window opens when the detector is created and is pushed forward by
/// every heartbeat. Once it lapses the detector latches: later heartbeats,
/// for instance from a primary that was only partitioned, do not revive it.
#[derive(Debug, Clone)]
pub struct HeartbeatDetector {
    timeout: Duration,
    last_seen: Instant,
    heartbeats: u64,
    fired: bool,
}

impl HeartbeatDetector {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_seen: now,
            heartbeats: 0,
            fired: false,
        }
    }

    pub fn observe_heartbeat(&mut self, now: Instant) {
        self.heartbeats += 1;
        if self.fired {
            trace!("heartbeat after primary declared dead; ignored");
            return;
        }
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// Instant at which the primary is declared dead if nothing else arrives.
    pub fn deadline(&self) -> Instant {
        self.last_seen + self.timeout
    }

    /// Raise the primary-dead signal if the window has lapsed.
    ///
    /// Returns how long the primary has been silent, exactly once per detector.
    pub fn poll(&mut self, now: Instant) -> Option<Duration> {
        if self.fired || now < self.deadline() {
            return None;
        }
        self.fired = true;
        Some(now.saturating_duration_since(self.last_seen))
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats
    }
}

/// Primary-side periodic liveness broadcast.
pub struct HeartbeatEmitter<T: ?Sized> {
    transport: Arc<T>,
    interval: Duration,
    role: RoleCell,
}

impl<T> HeartbeatEmitter<T>
where
    T: BroadcastTransport + ?Sized + 'static,
{
    pub fn new(transport: Arc<T>, interval: Duration, role: RoleCell) -> Self {
        Self {
            transport,
            interval,
            role,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(self.run(shutdown))
    }

    /// Broadcast a heartbeat every interval while this instance is primary.
    /// Returns the number of heartbeats handed to the transport.
    pub async fn run(self, shutdown: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sent = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.role.is_primary() {
                break;
            }
            match self
                .transport
                .send(Topic::Heartbeat, HeartbeatMessage.encode())
                .await
            {
                Ok(()) => sent += 1,
                // The next tick is the retry.
                Err(err) => warn!(error = %err, "heartbeat send failed"),
            }
        }
        debug!(sent, "heartbeat emitter stopped");
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procpair_transport::InMemorySegment;

    const TIMEOUT: Duration = Duration::from_millis(150);
    const INTERVAL: Duration = Duration::from_millis(10);

    #[test]
    fn regular_heartbeats_never_fire() {
        let start = Instant::now();
        let mut detector = HeartbeatDetector::new(TIMEOUT, start);
        for tick in 1..=200u32 {
            let now = start + INTERVAL * tick;
            detector.observe_heartbeat(now);
            assert_eq!(detector.poll(now + INTERVAL), None);
        }
        assert!(!detector.has_fired());
        assert_eq!(detector.heartbeats(), 200);
    }

    #[test]
    fn silence_fires_exactly_once() {
        let start = Instant::now();
        let mut detector = HeartbeatDetector::new(TIMEOUT, start);
        detector.observe_heartbeat(start + INTERVAL);

        assert_eq!(detector.poll(start + INTERVAL + TIMEOUT / 2), None);
        let silent = detector.poll(start + INTERVAL + TIMEOUT);
        assert_eq!(silent, Some(TIMEOUT));

        // A stale primary resuming its heartbeats does not un-raise the event.
        detector.observe_heartbeat(start + TIMEOUT * 2);
        assert_eq!(detector.poll(start + TIMEOUT * 10), None);
        assert!(detector.has_fired());
    }

    #[test]
    fn window_opens_at_creation() {
        let start = Instant::now();
        let mut detector = HeartbeatDetector::new(TIMEOUT, start);
        assert_eq!(detector.deadline(), start + TIMEOUT);
        assert_eq!(detector.poll(start + TIMEOUT - INTERVAL), None);
        assert!(detector.poll(start + TIMEOUT).is_some());
    }

    #[test]
    fn late_arrivals_do_not_move_window_backwards() {
        let start = Instant::now();
        let mut detector = HeartbeatDetector::new(TIMEOUT, start);
        detector.observe_heartbeat(start + INTERVAL * 5);
        detector.observe_heartbeat(start + INTERVAL);
        assert_eq!(detector.deadline(), start + INTERVAL * 5 + TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn emitter_broadcasts_while_primary() {
        let segment = InMemorySegment::new();
        let emitter_side = Arc::new(segment.endpoint());
        let listener = segment.endpoint();
        let role = RoleCell::new();
        role.promote();

        let shutdown = CancellationToken::new();
        let handle =
            HeartbeatEmitter::new(emitter_side, INTERVAL, role).spawn(shutdown.clone());

        for _ in 0..5 {
            let payload = listener.recv(Topic::Heartbeat).await.unwrap();
            assert_eq!(payload.as_ref(), b"I am alive.");
        }
        shutdown.cancel();
        let sent = handle.await.unwrap();
        assert!(sent >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn emitter_is_silent_while_backup() {
        let segment = InMemorySegment::new();
        let emitter_side = Arc::new(segment.endpoint());
        let role = RoleCell::new();

        let sent = HeartbeatEmitter::new(emitter_side.clone(), INTERVAL, role)
            .run(CancellationToken::new())
            .await;
        assert_eq!(sent, 0);
        assert_eq!(emitter_side.metrics().sent, 0);
    }
}
