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

use procpair_transport::{BroadcastTransport, Checkpoint, Topic, TransportError};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointListener;
use crate::heartbeat::HeartbeatDetector;

/// Raised once by a backup whose primary went silent.
///
/// Carries the checkpoint captured at that moment so the promotion does not
/// depend on anything else still being readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryDead {
    pub resume_from: Checkpoint,
    pub silent_for: Duration,
}

/// Backup-side listener for heartbeats and checkpoints.
pub struct BackupMonitor<T: ?Sized> {
    transport: Arc<T>,
    failure_timeout: Duration,
    listener: CheckpointListener,
}

impl<T> BackupMonitor<T>
where
    T: BroadcastTransport + ?Sized,
{
    pub fn new(transport: Arc<T>, failure_timeout: Duration) -> Self {
        Self {
            transport,
            failure_timeout,
            listener: CheckpointListener::new(),
        }
    }

    /// Live view of the shadow checkpoint while the monitor runs.
    pub fn shadow(&self) -> watch::Receiver<Checkpoint> {
        self.listener.subscribe()
    }

    /// Listen until the primary is declared dead or `shutdown` fires.
    ///
    /// Returns `Ok(None)` on shutdown. Listening stops as soon as the
    /// primary-dead event is produced.
    pub async fn run(
        mut self,
        shutdown: &CancellationToken,
    ) -> Result<Option<PrimaryDead>, TransportError> {
        let mut detector = HeartbeatDetector::new(self.failure_timeout, Instant::now());
        debug!(
            timeout_ms = self.failure_timeout.as_millis() as u64,
            transport = self.transport.name(),
            "backup monitor listening"
        );
        loop {
            let deadline = detector.deadline();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(checkpoint = %self.listener.current(), "backup monitor shut down");
                    return Ok(None);
                }
                heartbeat = self.transport.recv(Topic::Heartbeat) => {
                    heartbeat?;
                    detector.observe_heartbeat(Instant::now());
                }
                payload = self.transport.recv(Topic::Checkpoint) => {
                    self.listener.observe_payload(&payload?);
                }
                _ = sleep_until(deadline) => {
                    if let Some(silent_for) = detector.poll(Instant::now()) {
                        let event = PrimaryDead {
                            resume_from: self.listener.current(),
                            silent_for,
                        };
                        if self.listener.received() == 0 {
                            warn!(
                                "no checkpoint received before takeover; resuming from zero may repeat completed work"
                            );
                        }
                        info!(
                            silent_ms = silent_for.as_millis() as u64,
                            heartbeats = detector.heartbeats(),
                            checkpoints = self.listener.received(),
                            resume_from = %event.resume_from,
                            "primary process timed out"
                        );
                        return Ok(Some(event));
                    }
                }
            }
        }
    }
}
