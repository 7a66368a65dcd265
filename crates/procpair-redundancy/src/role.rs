//! ---
//! pp_section: "07-resilience-fault-tolerance"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Process-pair failover coordinators."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use strum::Display;

/// Role held by one instance of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    Backup = 0,
    Primary = 1,
}

/// Process-wide role flag shared by every task of an instance.
///
/// Starts as [`Role::Backup`] and can move to [`Role::Primary`] exactly once.
/// There is no demotion.
#[derive(Debug, Clone, Default)]
pub struct RoleCell {
    inner: Arc<AtomicU8>,
}

impl RoleCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Role {
        match self.inner.load(Ordering::Acquire) {
            0 => Role::Backup,
            _ => Role::Primary,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.get() == Role::Primary
    }

    /// Flip Backup to Primary. Returns `false` if this instance was already primary.
    pub fn promote(&self) -> bool {
        self.inner
            .compare_exchange(
                Role::Backup as u8,
                Role::Primary as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
