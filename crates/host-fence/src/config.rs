//! Hook configuration.
//!
//! Everything the hook needs besides the CLI flags lives in an optional TOML
//! file. A missing file yields the defaults below, which match a stock
//! OpenNebula front-end with `fence-agents` installed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/one/host-fence.toml";

/// Top-level hook configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Power fencing parameters.
    pub fence: FenceConfig,
    /// VM remediation parameters.
    pub remediation: RemediationConfig,
    /// Cluster CLI locations and timing.
    pub cluster: ClusterConfig,
}

/// Command line dialect of the `fence_ipmilan` agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentDialect {
    /// fence-agents 3.x (`-M`, `-T`, `-t`).
    Legacy,
    /// fence-agents 4.x (`-m`, `--power-wait=`, `--power-timeout`).
    Modern,
}

/// How the agent power-cycles the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceMethod {
    /// Power off, then power on.
    Onoff,
    /// Single chassis power cycle.
    Cycle,
}

impl std::fmt::Display for FenceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onoff => write!(f, "onoff"),
            Self::Cycle => write!(f, "cycle"),
        }
    }
}

/// Power fencing parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FenceConfig {
    /// Path of the fence agent executable.
    pub agent_path: PathBuf,
    /// Which argument style the agent understands.
    pub agent_dialect: AgentDialect,
    /// Power-cycle method passed to the agent.
    pub method: FenceMethod,
    /// Seconds the agent waits after an on/off operation (4 for HP iLO 3).
    pub power_wait_secs: u64,
    /// Timeout in seconds for a single IPMI operation.
    pub power_timeout_secs: u64,
    /// Number of attempts before giving up.
    pub max_retries: u32,
    /// Pause between failed attempts.
    pub retry_wait_secs: u64,
    /// Upper bound for one agent invocation.
    pub attempt_timeout_secs: u64,
    /// Substrings of agent stdout that mean the power operation was accepted.
    pub success_markers: Vec<String>,
    /// Also require a zero exit status. The 3.x agent exits 255 on success.
    pub require_zero_exit: bool,
}

impl Default for FenceConfig {
    fn default() -> Self {
        Self {
            agent_path: PathBuf::from("/usr/sbin/fence_ipmilan"),
            agent_dialect: AgentDialect::Modern,
            method: FenceMethod::Cycle,
            power_wait_secs: 4,
            power_timeout_secs: 5,
            max_retries: 3,
            retry_wait_secs: 10,
            attempt_timeout_secs: 60,
            success_markers: vec!["Rebooting".to_string(), "Success: Rebooted".to_string()],
            require_zero_exit: false,
        }
    }
}

impl FenceConfig {
    /// Pause between failed attempts.
    #[must_use]
    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_secs)
    }

    /// Upper bound for one agent invocation.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// VM remediation parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Pause between the failure and retry recovery of a stuck VM.
    pub recovery_grace_secs: u64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            recovery_grace_secs: 5,
        }
    }
}

impl RemediationConfig {
    /// Pause between the failure and retry recovery of a stuck VM.
    #[must_use]
    pub fn recovery_grace(&self) -> Duration {
        Duration::from_secs(self.recovery_grace_secs)
    }
}

/// Cluster CLI locations and timing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// `onehost` executable.
    pub onehost: PathBuf,
    /// `onevm` executable.
    pub onevm: PathBuf,
    /// `oned.conf`, read for `MONITORING_INTERVAL`.
    pub oned_conf: PathBuf,
    /// Used when `oned.conf` does not set `MONITORING_INTERVAL`.
    pub default_monitoring_interval_secs: u64,
    /// Upper bound for one CLI call.
    pub command_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let oned_conf = std::env::var("ONE_LOCATION").map_or_else(
            |_| PathBuf::from("/etc/one/oned.conf"),
            |location| Path::new(&location).join("etc/oned.conf"),
        );

        Self {
            onehost: PathBuf::from("onehost"),
            onevm: PathBuf::from("onevm"),
            oned_conf,
            default_monitoring_interval_secs: 60,
            command_timeout_secs: 120,
        }
    }
}

impl HookConfig {
    /// Load configuration from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fence.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "fence.max_retries must be at least 1".to_string(),
            ));
        }
        if self.fence.success_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "fence.success_markers must contain a non-empty marker".to_string(),
            ));
        }
        if self.fence.attempt_timeout_secs == 0 || self.cluster.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        Ok(())
    }
}
