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

use chrono::{DateTime, Utc};
use procpair_common::PairConfig;
use procpair_transport::{BroadcastTransport, Checkpoint, TransportError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointReplicator;
use crate::heartbeat::HeartbeatEmitter;
use crate::monitor::{BackupMonitor, PrimaryDead};
use crate::role::{Role, RoleCell};
use crate::supervisor::{ProcessSupervisor, SupervisorError};
use crate::work::{Work, WorkLoop};

#[derive(Debug, thiserror::Error)]
pub enum PairError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("checkpoint counter exhausted at {0}")]
    CheckpointExhausted(Checkpoint),
    #[error("instance is already primary")]
    AlreadyPrimary,
}

/// Timing knobs of one pair instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairSettings {
    pub heartbeat_interval: Duration,
    pub failure_timeout: Duration,
    pub replication_buffer: usize,
}

impl Default for PairSettings {
    fn default() -> Self {
        Self::from(&PairConfig::default())
    }
}

impl From<&PairConfig> for PairSettings {
    fn from(config: &PairConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            failure_timeout: config.failure_timeout,
            replication_buffer: config.replication_buffer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionReason {
    /// The primary stopped sending heartbeats.
    HeartbeatTimeout,
    /// An operator started this instance directly as primary.
    Bootstrap,
}

/// Record of the one Backup to Primary transition of an instance.
#[derive(Debug, Clone)]
pub struct Promotion {
    pub resume_from: Checkpoint,
    pub reason: PromotionReason,
    pub silent_for: Option<Duration>,
    pub triggered_at: DateTime<Utc>,
    pub standby_spawned: bool,
    pub standby_pid: Option<u32>,
}

/// How [`ProcessPair::run`] ended.
#[derive(Debug, Clone)]
pub struct PairOutcome {
    pub role: Role,
    pub promotion: Option<Promotion>,
    /// First checkpoint not worked on, when the instance ran as primary.
    pub next_checkpoint: Option<Checkpoint>,
    pub checkpoints_replicated: u64,
}

/// One instance of a primary/backup process pair.
///
/// Instances are born as backups. [`ProcessPair::run`] monitors the primary,
/// promotes on silence, and then works until the shutdown token fires, which
/// by default never happens.
pub struct ProcessPair<T: ?Sized, S> {
    settings: PairSettings,
    transport: Arc<T>,
    supervisor: S,
    role: RoleCell,
    shutdown: CancellationToken,
}

impl<T, S> ProcessPair<T, S>
where
    T: BroadcastTransport + ?Sized + 'static,
    S: ProcessSupervisor,
{
    pub fn new(settings: PairSettings, transport: Arc<T>, supervisor: S) -> Self {
        Self {
            settings,
            transport,
            supervisor,
            role: RoleCell::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the shutdown signal consulted by every task of this instance.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn role(&self) -> Role {
        self.role.get()
    }

    pub fn settings(&self) -> &PairSettings {
        &self.settings
    }

    /// Fresh backup-side listener on this instance's transport.
    pub fn backup_monitor(&self) -> BackupMonitor<T> {
        BackupMonitor::new(self.transport.clone(), self.settings.failure_timeout)
    }

    /// Full lifecycle: listen as backup, take over on silence, then work.
    pub async fn run<W: Work + ?Sized>(&self, work: &mut W) -> Result<PairOutcome, PairError> {
        info!(pid = std::process::id(), role = %self.role(), "instance starting as backup");
        let Some(event) = self.backup_monitor().run(&self.shutdown).await? else {
            return Ok(PairOutcome {
                role: self.role(),
                promotion: None,
                next_checkpoint: None,
                checkpoints_replicated: 0,
            });
        };
        info!("switching from backup mode to primary mode");
        let primary = self.promote(event).ok_or(PairError::AlreadyPrimary)?;
        primary.run(work).await
    }

    /// Start directly as primary at `from`, skipping the backup phase.
    pub async fn run_as_primary<W: Work + ?Sized>(
        &self,
        from: Checkpoint,
        work: &mut W,
    ) -> Result<PairOutcome, PairError> {
        let primary = self
            .take_over(from, PromotionReason::Bootstrap, None)
            .ok_or(PairError::AlreadyPrimary)?;
        primary.run(work).await
    }

    /// React to a primary-dead event.
    ///
    /// The first call promotes this instance and returns the running primary
    /// side, ready for its work loop. Every later call is ignored and returns
    /// `None`: no second backup is spawned and no second emitter starts.
    pub fn promote(&self, event: PrimaryDead) -> Option<PrimaryRuntime> {
        self.take_over(
            event.resume_from,
            PromotionReason::HeartbeatTimeout,
            Some(event.silent_for),
        )
    }

    fn take_over(
        &self,
        resume_from: Checkpoint,
        reason: PromotionReason,
        silent_for: Option<Duration>,
    ) -> Option<PrimaryRuntime> {
        if !self.role.promote() {
            warn!(?reason, %resume_from, "already primary; ignoring promotion request");
            return None;
        }

        let emitter = HeartbeatEmitter::new(
            self.transport.clone(),
            self.settings.heartbeat_interval,
            self.role.clone(),
        )
        .spawn(self.shutdown.clone());
        let (handoff, replicator) =
            CheckpointReplicator::channel(self.transport.clone(), self.settings.replication_buffer);
        let replicator = replicator.spawn();

        let (standby_spawned, standby_pid) = match self.supervisor.spawn_backup() {
            Ok(spawned) => (true, spawned.pid),
            Err(SupervisorError::Disabled) => {
                info!("backup spawning disabled; running without a standby");
                (false, None)
            }
            Err(err) => {
                error!(error = %err, "failed to spawn backup; running without a standby");
                (false, None)
            }
        };

        let promotion = Promotion {
            resume_from,
            reason,
            silent_for,
            triggered_at: Utc::now(),
            standby_spawned,
            standby_pid,
        };
        info!(
            pid = std::process::id(),
            checkpoint = %resume_from,
            ?reason,
            standby_spawned,
            "primary started with initial checkpoint {}",
            resume_from
        );

        Some(PrimaryRuntime {
            promotion,
            work_loop: WorkLoop::new(resume_from, handoff, self.role.clone(), self.shutdown.clone()),
            emitter,
            replicator,
        })
    }
}

/// Primary side of a promoted instance: emitter and replicator are running,
/// the work loop has not started yet.
pub struct PrimaryRuntime {
    promotion: Promotion,
    work_loop: WorkLoop,
    emitter: JoinHandle<u64>,
    replicator: JoinHandle<u64>,
}

impl PrimaryRuntime {
    pub fn promotion(&self) -> &Promotion {
        &self.promotion
    }

    /// Run the work loop until shutdown, then drain replication and stop the
    /// heartbeat.
    pub async fn run<W: Work + ?Sized>(self, work: &mut W) -> Result<PairOutcome, PairError> {
        let Self {
            promotion,
            work_loop,
            emitter,
            replicator,
        } = self;

        let result = work_loop.run(work).await;

        let checkpoints_replicated = match replicator.await {
            Ok(sent) => sent,
            Err(err) => {
                warn!(error = %err, "checkpoint replicator task failed");
                0
            }
        };
        // Stops heartbeats even when the loop ended on an error, so that a
        // backup takes over.
        emitter.abort();
        if let Ok(sent) = emitter.await {
            debug!(heartbeats = sent, "heartbeat emitter joined");
        }

        let next_checkpoint = result?;
        info!(next = %next_checkpoint, replicated = checkpoints_replicated, "primary stopped");
        Ok(PairOutcome {
            role: Role::Primary,
            promotion: Some(promotion),
            next_checkpoint: Some(next_checkpoint),
            checkpoints_replicated,
        })
    }
}
