//! ---
//! pp_section: "07-resilience-fault-tolerance"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Process-pair failover coordinators."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use procpair_common::SupervisorConfig;
use tokio::process::Command;
use tracing::info;

/// Launched replacement backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedBackup {
    pub pid: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("backup spawning is disabled")]
    Disabled,
    #[error("unable to determine the backup program: {0}")]
    Program(#[source] std::io::Error),
    #[error("failed to launch backup {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Capability to start a fresh backup instance after promotion.
///
/// A successful return only means the OS accepted the launch; nothing
/// confirms the new backup is actually listening.
pub trait ProcessSupervisor: Send + Sync {
    fn spawn_backup(&self) -> Result<SpawnedBackup, SupervisorError>;
}

impl<S: ProcessSupervisor + ?Sized> ProcessSupervisor for Arc<S> {
    fn spawn_backup(&self) -> Result<SpawnedBackup, SupervisorError> {
        (**self).spawn_backup()
    }
}

/// Launches the backup as a detached child process.
#[derive(Debug, Clone)]
pub struct CommandSupervisor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSupervisor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from configuration, defaulting to the running executable with
    /// `default_args` when the configuration leaves them unset.
    pub fn from_config(
        config: &SupervisorConfig,
        default_args: Vec<String>,
    ) -> Result<Self, SupervisorError> {
        let program = match &config.program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(SupervisorError::Program)?,
        };
        let args = config.args.clone().unwrap_or(default_args);
        Ok(Self::new(program, args))
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl ProcessSupervisor for CommandSupervisor {
    fn spawn_backup(&self) -> Result<SpawnedBackup, SupervisorError> {
        let mut std_command = std::process::Command::new(&self.program);
        std_command.args(&self.args).stdin(Stdio::null());
        // Own process group: an interrupt aimed at the primary must not take
        // its backup down with it.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }
        let mut command = Command::from(std_command);
        command.kill_on_drop(false);

        let child = command.spawn().map_err(|source| SupervisorError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        let pid = child.id();
        info!(program = %self.program.display(), args = ?self.args, ?pid, "backup process launched");
        Ok(SpawnedBackup { pid })
    }
}

/// Never launches anything; used when an operator manages the backup.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSupervisor;

impl ProcessSupervisor for DisabledSupervisor {
    fn spawn_backup(&self) -> Result<SpawnedBackup, SupervisorError> {
        Err(SupervisorError::Disabled)
    }
}
