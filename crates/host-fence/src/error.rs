//! Error types for the host failure hook.

use std::path::PathBuf;

use thiserror::Error;

use crate::fencing::FenceAttempt;

/// Errors returned by a [`ClusterApi`](crate::cluster::ClusterApi) implementation.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The cluster CLI could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The cluster CLI exited with a failure status.
    #[error("{program} {args} failed (exit {code:?}): {stderr}")]
    Command {
        program: String,
        args: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The cluster CLI did not answer in time.
    #[error("{program} timed out after {secs} seconds")]
    Timeout { program: String, secs: u64 },

    /// Output of the cluster CLI could not be parsed.
    #[error("failed to parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A record was returned but is missing required data.
    #[error("invalid {what}: {message}")]
    Invalid { what: &'static str, message: String },

    /// Reading cluster configuration failed.
    #[error("failed to read {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors decoding the host metadata blob into power-control credentials.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The blob is not valid base64.
    #[error("host metadata is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded blob is not UTF-8 text.
    #[error("host metadata is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// One or more credential fields are missing.
    #[error("IPMI credentials incomplete, missing: {}", .0.join(", "))]
    Incomplete(Vec<&'static str>),
}

/// Errors loading the hook configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`HookConfig`](crate::config::HookConfig).
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Fatal errors of a hook run. Every variant aborts the run before any
/// further side effect.
#[derive(Error, Debug)]
pub enum HookError {
    /// Input validation failed before anything was touched.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The host metadata did not yield usable credentials.
    #[error("precondition failed: {0}")]
    Credentials(#[from] CredentialError),

    /// The fencing agent is not installed at the configured path.
    #[error("fence agent not installed at {}", .0.display())]
    AgentMissing(PathBuf),

    /// Host or VM data could not be obtained.
    #[error("cluster API error: {0}")]
    Cluster(#[from] ClusterError),

    /// Host state could not be refreshed during the reachability wait.
    #[error("could not refresh host state during reachability wait: {0}")]
    Reachability(#[source] ClusterError),

    /// Every fencing attempt failed. The host may still be running VMs.
    #[error(
        "fencing failed after {} attempts, reboot the host manually, then reschedule its VMs",
        .attempts.len()
    )]
    FenceFailed { attempts: Vec<FenceAttempt> },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HookError {
    /// Process exit code for this error class.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Precondition(_) | Self::Credentials(_) | Self::AgentMissing(_) => 2,
            Self::Reachability(_) => 3,
            Self::FenceFailed { .. } => 4,
            Self::Cluster(_) => 5,
            Self::Config(_) => 6,
        }
    }
}
