//! ---
//! pp_section: "01-core-functionality"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Shared primitives and utilities for the core runtime."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::{debug, warn};

use crate::logging::LogFormat;

fn default_heartbeat_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_failure_timeout() -> Duration {
    Duration::from_millis(150)
}

fn default_work_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_replication_buffer() -> usize {
    1
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_broadcast_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::BROADCAST)
}

fn default_heartbeat_port() -> u16 {
    9090
}

fn default_checkpoint_port() -> u16 {
    9191
}

fn default_supervisor_enabled() -> bool {
    true
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_file_enabled() -> bool {
    true
}

/// Below this multiple of the heartbeat interval ordinary jitter starts to
/// look like a dead primary.
const MIN_SAFE_TIMEOUT_FACTOR: u32 = 3;

/// Top-level configuration for a process-pair instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pair: PairConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no candidate existed and built-in defaults were used.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "PROCPAIR_CONFIG";

    /// Load configuration, respecting the `PROCPAIR_CONFIG` override and falling
    /// back to defaults when none of the candidates exist.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedAppConfig {
            config: Self::default(),
            source: None,
        })
    }

    /// Read and validate a single configuration file. Missing files are an error.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.pair.validate()?;
        self.network.validate()?;
        self.supervisor.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Timing of the heartbeat, failure detection, and work pacing.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairConfig {
    #[serde(rename = "heartbeat_interval_ms", default = "default_heartbeat_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat_interval: Duration,
    #[serde(rename = "failure_timeout_ms", default = "default_failure_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub failure_timeout: Duration,
    #[serde(rename = "work_interval_ms", default = "default_work_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub work_interval: Duration,
    /// Capacity of the hand-off between the work loop and the checkpoint replicator.
    #[serde(default = "default_replication_buffer")]
    pub replication_buffer: usize,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            failure_timeout: default_failure_timeout(),
            work_interval: default_work_interval(),
            replication_buffer: default_replication_buffer(),
        }
    }
}

impl PairConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(anyhow!("pair.heartbeat_interval_ms must be greater than zero"));
        }
        if self.failure_timeout <= self.heartbeat_interval {
            return Err(anyhow!(
                "pair.failure_timeout_ms ({:?}) must exceed pair.heartbeat_interval_ms ({:?})",
                self.failure_timeout,
                self.heartbeat_interval
            ));
        }
        if self.replication_buffer == 0 {
            return Err(anyhow!("pair.replication_buffer must be at least 1"));
        }
        if self.failure_timeout < self.heartbeat_interval * MIN_SAFE_TIMEOUT_FACTOR {
            warn!(
                failure_timeout_ms = self.failure_timeout.as_millis() as u64,
                heartbeat_interval_ms = self.heartbeat_interval.as_millis() as u64,
                "failure timeout is less than {}x the heartbeat interval; expect false failovers",
                MIN_SAFE_TIMEOUT_FACTOR
            );
        }
        Ok(())
    }
}

/// Broadcast segment the pair communicates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: IpAddr,
    #[serde(default = "default_heartbeat_port")]
    pub heartbeat_port: u16,
    #[serde(default = "default_checkpoint_port")]
    pub checkpoint_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            broadcast_addr: default_broadcast_addr(),
            heartbeat_port: default_heartbeat_port(),
            checkpoint_port: default_checkpoint_port(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_port == 0 || self.checkpoint_port == 0 {
            return Err(anyhow!("network ports must be fixed, non-zero values"));
        }
        if self.heartbeat_port == self.checkpoint_port {
            return Err(anyhow!(
                "network.heartbeat_port and network.checkpoint_port must differ (both {})",
                self.heartbeat_port
            ));
        }
        if !self.bind_addr.is_ipv4() || !self.broadcast_addr.is_ipv4() {
            return Err(anyhow!("broadcast transport only supports IPv4 addresses"));
        }
        Ok(())
    }
}

/// How a promoted primary launches its replacement backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_supervisor_enabled")]
    pub enabled: bool,
    /// Program to launch. Defaults to the running executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
    /// Arguments for `program`. Defaults to re-running the daemon in backup mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: default_supervisor_enabled(),
            program: None,
            args: None,
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(program) = &self.program {
            if program.as_os_str().is_empty() {
                return Err(anyhow!("supervisor.program must not be empty when set"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_prefix: Option<String>,
    #[serde(default = "default_file_enabled")]
    pub file_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_enabled: default_file_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let config = AppConfig::default();
        assert_eq!(config.pair.heartbeat_interval, Duration::from_millis(10));
        assert_eq!(config.pair.failure_timeout, Duration::from_millis(150));
        assert_eq!(config.pair.replication_buffer, 1);
        assert_eq!(config.network.heartbeat_port, 9090);
        assert_eq!(config.network.checkpoint_port, 9191);
        assert_eq!(
            config.network.broadcast_addr,
            IpAddr::V4(Ipv4Addr::BROADCAST)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_millisecond_durations() {
        let config: AppConfig = r#"
            [pair]
            heartbeat_interval_ms = 20
            failure_timeout_ms = 300

            [network]
            broadcast_addr = "127.0.0.1"
            heartbeat_port = 19090
            checkpoint_port = 19191
        "#
        .parse()
        .expect("valid configuration");
        assert_eq!(config.pair.heartbeat_interval, Duration::from_millis(20));
        assert_eq!(config.pair.failure_timeout, Duration::from_millis(300));
        assert_eq!(config.pair.work_interval, Duration::from_millis(100));
        assert_eq!(config.network.heartbeat_port, 19090);
        assert!(config.supervisor.enabled);
    }

    #[test]
    fn rejects_timeout_not_exceeding_interval() {
        let err = r#"
            [pair]
            heartbeat_interval_ms = 50
            failure_timeout_ms = 50
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("failure_timeout_ms"));
    }

    #[test]
    fn rejects_shared_ports() {
        let err = r#"
            [network]
            heartbeat_port = 9000
            checkpoint_port = 9000
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn renders_back_to_toml() {
        let mut config = AppConfig::default();
        config.supervisor.args = Some(vec!["run".into()]);
        let rendered = config.to_toml().expect("render");
        let reparsed: AppConfig = rendered.parse().expect("reparse");
        assert_eq!(reparsed.pair, config.pair);
        assert_eq!(reparsed.network, config.network);
        assert_eq!(reparsed.supervisor, config.supervisor);
    }
}
