//! ---
//! pp_section: "01-core-functionality"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Shared primitives and utilities for the core runtime."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
//! Core shared primitives for the process-pair workspace.
//! This crate exposes configuration loading and logging initialisation
//! consumed by the transport, redundancy, and daemon crates.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, LoadedAppConfig, LoggingConfig, NetworkConfig, PairConfig, SupervisorConfig,
};
pub use logging::{init_tracing, LogFormat};
