//! OpenNebula command-line client.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::models::{HostDocument, VmDocument, VmPoolDocument};
use super::{ClusterApi, Host, VirtualMachine};
use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::runner::{CommandRunner, RunError};

static MONITORING_INTERVAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*MONITORING_INTERVAL\s*=\s*(\d+)").expect("static regex")
});

/// [`ClusterApi`] backed by `onehost` and `onevm`.
#[derive(Clone)]
pub struct OneCli {
    onehost: PathBuf,
    onevm: PathBuf,
    oned_conf: PathBuf,
    default_interval: Duration,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl OneCli {
    /// Create a client using `runner` to launch the CLI tools.
    #[must_use]
    pub fn new(config: &ClusterConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            onehost: config.onehost.clone(),
            onevm: config.onevm.clone(),
            oned_conf: config.oned_conf.clone(),
            default_interval: Duration::from_secs(config.default_monitoring_interval_secs),
            timeout: Duration::from_secs(config.command_timeout_secs),
            runner,
        }
    }

    /// Run a CLI tool and return its stdout.
    async fn call(&self, program: &Path, args: &[String]) -> Result<String, ClusterError> {
        let name = program.display().to_string();
        debug!(program = %name, args = %args.join(" "), "Calling cluster CLI");

        let output = self
            .runner
            .run(program, args, self.timeout)
            .await
            .map_err(|e| match e {
                RunError::Spawn(source) => ClusterError::Spawn {
                    program: name.clone(),
                    source,
                },
                RunError::Timeout(limit) => ClusterError::Timeout {
                    program: name.clone(),
                    secs: limit.as_secs(),
                },
            })?;

        if output.success() {
            Ok(output.stdout)
        } else {
            Err(ClusterError::Command {
                program: name,
                args: args.join(" "),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        program: &Path,
        args: &[String],
        what: &'static str,
    ) -> Result<T, ClusterError> {
        let stdout = self.call(program, args).await?;
        serde_json::from_str(&stdout).map_err(|source| ClusterError::Parse { what, source })
    }

    async fn onevm(&self, args: &[&str]) -> Result<(), ClusterError> {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        self.call(&self.onevm, &args).await.map(drop)
    }

    async fn recover(&self, id: u32, flag: &str) -> Result<(), ClusterError> {
        self.onevm(&["recover", &id.to_string(), flag]).await
    }
}

/// `MONITORING_INTERVAL` from the text of `oned.conf`.
fn parse_monitoring_interval(conf: &str) -> Option<u64> {
    MONITORING_INTERVAL_RE
        .captures(conf)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .filter(|secs| *secs > 0)
}

#[async_trait]
impl ClusterApi for OneCli {
    async fn get_host(&self, id: u32) -> Result<Host, ClusterError> {
        let args = vec!["show".to_string(), id.to_string(), "--json".to_string()];
        let doc: HostDocument = self.call_json(&self.onehost, &args, "host").await?;
        Ok(doc.host.into())
    }

    async fn monitoring_interval(&self) -> Result<Duration, ClusterError> {
        let conf = match tokio::fs::read_to_string(&self.oned_conf).await {
            Ok(conf) => conf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %self.oned_conf.display(),
                    default_secs = self.default_interval.as_secs(),
                    "oned.conf not found, using default monitoring interval"
                );
                return Ok(self.default_interval);
            }
            Err(source) => {
                return Err(ClusterError::Config {
                    path: self.oned_conf.clone(),
                    source,
                })
            }
        };

        Ok(parse_monitoring_interval(&conf).map_or(self.default_interval, Duration::from_secs))
    }

    async fn list_vms_last_seen_on(
        &self,
        host_name: &str,
        include_suspended: bool,
    ) -> Result<Vec<VirtualMachine>, ClusterError> {
        let args = vec!["list".to_string(), "all".to_string(), "--json".to_string()];
        let doc: VmPoolDocument = self.call_json(&self.onevm, &args, "VM pool").await?;

        Ok(doc
            .pool
            .vms
            .into_vec()
            .into_iter()
            .map(VirtualMachine::from)
            .filter(|vm| vm.is_remediation_target(host_name, include_suspended))
            .collect())
    }

    async fn refresh_vm(&self, id: u32) -> Result<VirtualMachine, ClusterError> {
        let args = vec!["show".to_string(), id.to_string(), "--json".to_string()];
        let doc: VmDocument = self.call_json(&self.onevm, &args, "VM").await?;
        let vm = VirtualMachine::from(doc.vm);

        if vm.id != id {
            return Err(ClusterError::Invalid {
                what: "VM",
                message: format!("asked for VM {id}, got VM {}", vm.id),
            });
        }
        Ok(vm)
    }

    async fn delete_and_recreate(&self, id: u32) -> Result<(), ClusterError> {
        self.recover(id, "--recreate").await
    }

    async fn delete(&self, id: u32) -> Result<(), ClusterError> {
        self.recover(id, "--delete").await
    }

    async fn reschedule(&self, id: u32) -> Result<(), ClusterError> {
        self.onevm(&["resched", &id.to_string()]).await
    }

    async fn recover_as_failure(&self, id: u32) -> Result<(), ClusterError> {
        self.recover(id, "--failure").await
    }

    async fn recover_as_retry(&self, id: u32) -> Result<(), ClusterError> {
        self.recover(id, "--retry").await
    }
}
