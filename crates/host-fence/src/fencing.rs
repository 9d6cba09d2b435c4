//! Power fencing through the IPMI fence agent.
//!
//! The agent is run with one fixed command line per host, retried a bounded
//! number of times with a fixed pause. An attempt counts as successful when
//! the agent reports the power operation on stdout.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{AgentDialect, FenceConfig};
use crate::credentials::IpmiCredentials;
use crate::error::HookError;
use crate::runner::{CommandOutput, CommandRunner};

const MASK: &str = "********";

/// One invocation of the fence agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Command line with the password masked.
    pub command_line: String,
    /// Agent exit code, `None` if it did not exit normally or never ran.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Outcome of [`PowerFencer::fence`].
#[derive(Debug)]
pub enum FenceOutcome {
    /// The last attempt succeeded.
    Fenced { attempts: Vec<FenceAttempt> },
    /// Every attempt failed.
    FenceFailed { attempts: Vec<FenceAttempt> },
}

impl FenceOutcome {
    /// Attempts made, in order.
    #[must_use]
    pub fn attempts(&self) -> &[FenceAttempt] {
        match self {
            Self::Fenced { attempts } | Self::FenceFailed { attempts } => attempts,
        }
    }
}

/// Drives the fence agent through the retry protocol.
pub struct PowerFencer {
    config: FenceConfig,
    runner: Arc<dyn CommandRunner>,
}

impl PowerFencer {
    #[must_use]
    pub fn new(config: FenceConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Path of the fence agent.
    #[must_use]
    pub fn agent_path(&self) -> &Path {
        &self.config.agent_path
    }

    /// Check that the fence agent is installed.
    ///
    /// # Errors
    /// Returns [`HookError::AgentMissing`] if the agent is not a file.
    pub fn ensure_agent_installed(&self) -> Result<(), HookError> {
        if self.config.agent_path.is_file() {
            Ok(())
        } else {
            Err(HookError::AgentMissing(self.config.agent_path.clone()))
        }
    }

    /// Agent arguments for `creds`. Identical for every attempt.
    #[must_use]
    pub fn command_args(&self, creds: &IpmiCredentials) -> Vec<String> {
        let c = &self.config;
        let mut args = vec![
            "-a".to_string(),
            creds.address.clone(),
            "-P".to_string(),
            "-l".to_string(),
            creds.user.clone(),
            "-p".to_string(),
            creds.password.clone(),
            "-o".to_string(),
            "reboot".to_string(),
        ];

        match c.agent_dialect {
            AgentDialect::Legacy => args.extend([
                "-M".to_string(),
                c.method.to_string(),
                "-T".to_string(),
                c.power_wait_secs.to_string(),
                "-t".to_string(),
                c.power_timeout_secs.to_string(),
            ]),
            AgentDialect::Modern => args.extend([
                "-m".to_string(),
                c.method.to_string(),
                format!("--power-wait={}", c.power_wait_secs),
                "--power-timeout".to_string(),
                c.power_timeout_secs.to_string(),
            ]),
        }

        args
    }

    /// Printable command line with the password replaced.
    #[must_use]
    pub fn display_command(&self, creds: &IpmiCredentials) -> String {
        let mut parts = vec![self.config.agent_path.display().to_string()];
        parts.extend(self.command_args(creds).into_iter().map(|arg| {
            if arg == creds.password {
                MASK.to_string()
            } else {
                arg
            }
        }));
        parts.join(" ")
    }

    /// Whether agent output means the power operation was accepted.
    #[must_use]
    pub fn is_success(&self, output: &CommandOutput) -> bool {
        let marker_found = self
            .config
            .success_markers
            .iter()
            .filter(|m| !m.is_empty())
            .any(|m| output.stdout.contains(m.as_str()));

        marker_found && (!self.config.require_zero_exit || output.success())
    }

    /// Run the agent until it succeeds or `max_retries` attempts failed.
    pub async fn fence(&self, creds: &IpmiCredentials) -> FenceOutcome {
        let args = self.command_args(creds);
        let command_line = self.display_command(creds);
        let max = self.config.max_retries;
        let mut attempts = Vec::new();

        info!(command = %command_line, max_retries = max, "Fencing host");

        for attempt in 1..=max {
            let result = self
                .runner
                .run(&self.config.agent_path, &args, self.config.attempt_timeout())
                .await;

            let record = match result {
                Ok(output) => FenceAttempt {
                    attempt,
                    command_line: command_line.clone(),
                    exit_code: output.code,
                    success: self.is_success(&output),
                    stdout: output.stdout,
                    stderr: output.stderr,
                },
                Err(e) => FenceAttempt {
                    attempt,
                    command_line: command_line.clone(),
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    success: false,
                },
            };

            if record.success {
                info!(
                    attempt,
                    exit_code = ?record.exit_code,
                    stdout = %record.stdout.trim(),
                    stderr = %record.stderr.trim(),
                    "Host was fenced"
                );
                attempts.push(record);
                return FenceOutcome::Fenced { attempts };
            }

            warn!(
                attempt,
                max_retries = max,
                exit_code = ?record.exit_code,
                stdout = %record.stdout.trim(),
                stderr = %record.stderr.trim(),
                "Fencing attempt not successful"
            );
            attempts.push(record);

            if attempt < max {
                tokio::time::sleep(self.config.retry_wait()).await;
            }
        }

        error!(
            attempts = attempts.len(),
            "Fencing failed on every attempt, giving up. Reboot the host manually, then reschedule its VMs"
        );
        FenceOutcome::FenceFailed { attempts }
    }
}
