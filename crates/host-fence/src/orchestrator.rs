//! The fence-and-remediate run.
//!
//! `Init -> WaitingForReachability -> Fencing -> Remediating -> Done`, with
//! an early `Done` when the host recovers during the wait. Any error aborts
//! the run in the phase where it happened. VMs are never touched unless
//! fencing succeeded.

use std::fmt;
use std::sync::Arc;

use tracing::{error, field, info, info_span, warn, Instrument, Span};

use crate::cluster::{ClusterApi, Host, HostState};
use crate::config::RemediationConfig;
use crate::credentials::{IpmiCredentials, PartialCredentials};
use crate::error::HookError;
use crate::fencing::{FenceOutcome, PowerFencer};
use crate::reachability::{Reachability, ReachabilityWaiter};
use crate::remediation::{RemediationPlan, RemediationPlanner, RemediationReport};

/// Default number of monitoring cycles to wait before fencing.
pub const DEFAULT_REPEAT: u32 = 2;

/// Run phase, used to tag log events and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    WaitingForReachability,
    Fencing,
    Remediating,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::WaitingForReachability => write!(f, "waiting_for_reachability"),
            Self::Fencing => write!(f, "fencing"),
            Self::Remediating => write!(f, "remediating"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Input of one hook invocation.
#[derive(Debug, Clone)]
pub struct HookRequest {
    /// Host identifier as passed by the cluster manager.
    pub host_id: String,
    /// Base64-encoded host record.
    pub host_metadata: String,
    pub plan: RemediationPlan,
    /// Monitoring cycles to wait before fencing; `0` fences immediately.
    pub repeat: u32,
    /// Run checks and the wait, but neither fence nor touch VMs.
    pub dry_run: bool,
}

/// How a successful run ended.
#[derive(Debug)]
pub enum HookOutcome {
    /// The host came back during the wait. Nothing was done.
    Recovered { state: HostState },
    /// The host was fenced and its VMs processed.
    Remediated {
        fence_attempts: usize,
        report: RemediationReport,
    },
}

/// Sequences the fence-and-remediate run for one failed host.
pub struct FenceOrchestrator {
    cluster: Arc<dyn ClusterApi>,
    fencer: PowerFencer,
    remediation: RemediationConfig,
}

impl FenceOrchestrator {
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        fencer: PowerFencer,
        remediation: RemediationConfig,
    ) -> Self {
        Self {
            cluster,
            fencer,
            remediation,
        }
    }

    /// Execute the run.
    ///
    /// # Errors
    /// Returns the fatal error that stopped the run. The error's
    /// [`exit_code`](HookError::exit_code) is the process exit status.
    pub async fn run(&self, request: &HookRequest) -> Result<HookOutcome, HookError> {
        let span = info_span!("host_hook", host = field::Empty, host_id = %request.host_id.trim());

        async {
            let mut phase = Phase::Init;
            let result = self.run_phases(request, &mut phase).await;

            match &result {
                Ok(_) => info!("Host hook finished"),
                Err(e @ HookError::FenceFailed { .. }) => error!(
                    %phase,
                    error = %e,
                    "HOST NOT FENCED, VMs left untouched, manual intervention required"
                ),
                Err(e) => error!(%phase, error = %e, "Host hook aborted"),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn run_phases(
        &self,
        request: &HookRequest,
        phase: &mut Phase,
    ) -> Result<HookOutcome, HookError> {
        let (host, creds) = self.init(request).await?;
        self.fence_and_remediate(request, &host, &creds, phase).await
    }

    /// Validate input and collect everything needed before the first wait.
    async fn init(&self, request: &HookRequest) -> Result<(Host, IpmiCredentials), HookError> {
        let host_id: u32 = request.host_id.trim().parse().map_err(|_| {
            HookError::Precondition(format!("invalid host id '{}'", request.host_id))
        })?;

        if request.host_metadata.trim().is_empty() {
            return Err(HookError::Precondition("host metadata is empty".to_string()));
        }
        let from_blob = PartialCredentials::from_encoded_template(&request.host_metadata)?;

        let host = self.cluster.get_host(host_id).await?;
        Span::current().record("host", host.name.as_str());
        info!(state = %host.state, "Host hook launched");

        let creds = if from_blob.is_complete() {
            from_blob.complete()?
        } else {
            warn!("Host metadata lacks IPMI data, using host template");
            from_blob
                .or(PartialCredentials::from_template(&host.template))
                .complete()?
        };

        self.fencer.ensure_agent_installed()?;

        Ok((host, creds))
    }

    async fn fence_and_remediate(
        &self,
        request: &HookRequest,
        host: &Host,
        creds: &IpmiCredentials,
        phase: &mut Phase,
    ) -> Result<HookOutcome, HookError> {
        enter(phase, Phase::WaitingForReachability);
        let interval = if request.repeat > 0 {
            self.cluster.monitoring_interval().await?
        } else {
            std::time::Duration::ZERO
        };

        let waiter = ReachabilityWaiter::new(self.cluster.as_ref(), interval, request.repeat);
        match waiter.wait(host.id).await {
            Reachability::Recovered(state) => {
                enter(phase, Phase::Done);
                return Ok(HookOutcome::Recovered { state });
            }
            Reachability::Indeterminate(e) => return Err(HookError::Reachability(e)),
            Reachability::StillDown => {}
        }

        enter(phase, Phase::Fencing);
        warn!(ipmi_address = %creds.address, "Host is going to be fenced");
        let fence_attempts = if request.dry_run {
            info!(
                command = %self.fencer.display_command(creds),
                "Dry run, fence agent not invoked"
            );
            0
        } else {
            match self.fencer.fence(creds).await {
                FenceOutcome::Fenced { attempts } => attempts.len(),
                FenceOutcome::FenceFailed { attempts } => {
                    return Err(HookError::FenceFailed { attempts });
                }
            }
        };

        enter(phase, Phase::Remediating);
        let targets = self
            .cluster
            .list_vms_last_seen_on(&host.name, request.plan.include_suspended)
            .await?;

        let planner = RemediationPlanner::new(
            self.cluster.as_ref(),
            request.plan,
            self.remediation.recovery_grace(),
        )
        .with_dry_run(request.dry_run);
        let report = planner.remediate(&targets).await;

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "VM remediation complete"
        );

        enter(phase, Phase::Done);
        Ok(HookOutcome::Remediated {
            fence_attempts,
            report,
        })
    }
}

fn enter(phase: &mut Phase, next: Phase) {
    tracing::debug!(from = %phase, to = %next, "Phase transition");
    *phase = next;
}
