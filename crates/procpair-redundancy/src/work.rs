//! ---
//! pp_section: "07-resilience-fault-tolerance"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Process-pair failover coordinators."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use procpair_transport::Checkpoint;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::checkpoint::CheckpointHandoff;
use crate::pair::PairError;
use crate::role::RoleCell;

/// One unit of application work, performed by the primary per checkpoint.
#[async_trait]
pub trait Work: Send {
    async fn perform(&mut self, checkpoint: Checkpoint);
}

/// Does nothing; the loop runs as fast as replication accepts checkpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWork;

#[async_trait]
impl Work for NoopWork {
    async fn perform(&mut self, _checkpoint: Checkpoint) {}
}

/// Placeholder work that takes a fixed amount of time per checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct PacedWork {
    interval: Duration,
}

impl PacedWork {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Work for PacedWork {
    async fn perform(&mut self, checkpoint: Checkpoint) {
        trace!(%checkpoint, "performing work");
        tokio::time::sleep(self.interval).await;
    }
}

/// Primary-side loop: work, hand off, advance.
pub struct WorkLoop {
    next: Checkpoint,
    handoff: CheckpointHandoff,
    role: RoleCell,
    shutdown: CancellationToken,
}

impl WorkLoop {
    pub fn new(
        start: Checkpoint,
        handoff: CheckpointHandoff,
        role: RoleCell,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            next: start,
            handoff,
            role,
            shutdown,
        }
    }

    /// Run until shutdown. The shutdown signal is consulted between
    /// iterations only, so a started unit of work is always replicated.
    ///
    /// Returns the first checkpoint that was not worked on.
    pub async fn run<W: Work + ?Sized>(mut self, work: &mut W) -> Result<Checkpoint, PairError> {
        while !self.shutdown.is_cancelled() && self.role.is_primary() {
            let current = self.next;
            work.perform(current).await;
            if !self.handoff.hand_off(current).await {
                warn!(checkpoint = %current, "checkpoint replicator gone; progress is not replicated");
            }
            self.next = current
                .next()
                .ok_or(PairError::CheckpointExhausted(current))?;
        }
        Ok(self.next)
    }
}
