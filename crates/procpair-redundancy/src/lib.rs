//! ---
//! pp_section: "07-resilience-fault-tolerance"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Process-pair failover coordinators."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
//! Process-pair failover: a backup watches the primary's heartbeats and
//! checkpoints, and on silence promotes itself, spawns a fresh backup, and
//! resumes work from the last checkpoint it heard.

mod checkpoint;
mod heartbeat;
mod monitor;
mod pair;
mod role;
mod supervisor;
mod work;

pub use checkpoint::{CheckpointHandoff, CheckpointListener, CheckpointReplicator};
pub use heartbeat::{HeartbeatDetector, HeartbeatEmitter};
pub use monitor::{BackupMonitor, PrimaryDead};
pub use pair::{
    PairError, PairOutcome, PairSettings, PrimaryRuntime, ProcessPair, Promotion, PromotionReason,
};
pub use role::{Role, RoleCell};
pub use supervisor::{
    CommandSupervisor, DisabledSupervisor, ProcessSupervisor, SpawnedBackup, SupervisorError,
};
pub use work::{NoopWork, PacedWork, Work, WorkLoop};

pub use procpair_transport::Checkpoint;
