//! Per-VM remediation after a host was fenced.
//!
//! Every VM last seen on the fenced host gets exactly one policy action.
//! Failures are logged and recorded per VM; the batch always runs to the end.

use std::fmt;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::cluster::{ClusterApi, VirtualMachine};
use crate::error::ClusterError;

/// What to do with the VMs of a fenced host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemediationPolicy {
    /// Reschedule onto another host. Requires shared storage.
    Migrate,
    /// Delete and resubmit. VM state is lost.
    #[default]
    Recreate,
    /// Delete without resubmission.
    Delete,
}

impl fmt::Display for RemediationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Migrate => write!(f, "migrate"),
            Self::Recreate => write!(f, "recreate"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Operator choice for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemediationPlan {
    pub policy: RemediationPolicy,
    /// Also remediate SUSPENDED VMs.
    pub include_suspended: bool,
}

/// Cluster command issued for a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmAction {
    DeleteAndRecreate,
    Delete,
    Reschedule,
}

impl From<RemediationPolicy> for VmAction {
    fn from(policy: RemediationPolicy) -> Self {
        match policy {
            RemediationPolicy::Migrate => Self::Reschedule,
            RemediationPolicy::Recreate => Self::DeleteAndRecreate,
            RemediationPolicy::Delete => Self::Delete,
        }
    }
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteAndRecreate => write!(f, "delete-recreate"),
            Self::Delete => write!(f, "delete"),
            Self::Reschedule => write!(f, "reschedule"),
        }
    }
}

/// How the stuck-VM recovery went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// VM was not stuck, or the policy never escalates.
    NotNeeded,
    /// Failure and retry recovery were both issued.
    Recovered,
    /// A recovery step failed; the message names it.
    Failed(String),
}

/// Result for one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRemediation {
    pub vm_id: u32,
    pub action: VmAction,
    /// `Err` holds the failure message; the action may not have been issued.
    pub result: Result<(), String>,
    pub escalation: Escalation,
    /// Dry run: the action was only logged.
    pub skipped: bool,
}

impl VmRemediation {
    /// Whether the action and any escalation went through.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.skipped && self.result.is_ok() && !matches!(self.escalation, Escalation::Failed(_))
    }

    /// Whether the VM needs manual attention.
    #[must_use]
    pub fn failed(&self) -> bool {
        !self.skipped && !self.succeeded()
    }
}

/// Results for a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemediationReport {
    pub vms: Vec<VmRemediation>,
}

impl RemediationReport {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.vms.iter().filter(|vm| vm.succeeded()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.vms.iter().filter(|vm| vm.failed()).count()
    }

    /// VMs left untouched by a dry run.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.vms.iter().filter(|vm| vm.skipped).count()
    }
}

/// Applies a [`RemediationPlan`] to the VMs of a fenced host.
pub struct RemediationPlanner<'a> {
    cluster: &'a dyn ClusterApi,
    plan: RemediationPlan,
    recovery_grace: Duration,
    dry_run: bool,
}

impl<'a> RemediationPlanner<'a> {
    #[must_use]
    pub fn new(cluster: &'a dyn ClusterApi, plan: RemediationPlan, recovery_grace: Duration) -> Self {
        Self {
            cluster,
            plan,
            recovery_grace,
            dry_run: false,
        }
    }

    /// Log actions instead of issuing them.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Remediate every VM in `targets`, in order, once each.
    pub async fn remediate(&self, targets: &[VirtualMachine]) -> RemediationReport {
        if targets.is_empty() {
            info!(policy = %self.plan.policy, "No VMs found on host, nothing to remediate");
            return RemediationReport::default();
        }

        info!(
            policy = %self.plan.policy,
            include_suspended = self.plan.include_suspended,
            vms = targets.len(),
            "Remediating VMs"
        );

        let mut report = RemediationReport::default();
        for vm in targets {
            report.vms.push(self.remediate_one(vm.id).await);
        }

        report
    }

    async fn remediate_one(&self, vm_id: u32) -> VmRemediation {
        let action = VmAction::from(self.plan.policy);

        let vm = match self.cluster.refresh_vm(vm_id).await {
            Ok(vm) => vm,
            Err(e) => {
                error!(vm_id, error = %e, "Could not refresh VM, skipping");
                return VmRemediation {
                    vm_id,
                    action,
                    result: Err(format!("refresh failed: {e}")),
                    escalation: Escalation::NotNeeded,
                    skipped: false,
                };
            }
        };

        if self.dry_run {
            info!(
                vm_id,
                %action,
                lcm_state = %vm.lcm_state,
                would_escalate = action == VmAction::Reschedule && vm.lcm_state.is_stuck(),
                "Dry run, VM left untouched"
            );
            return VmRemediation {
                vm_id,
                action,
                result: Ok(()),
                escalation: Escalation::NotNeeded,
                skipped: true,
            };
        }

        info!(vm_id, %action, state = %vm.state, "Remediating VM");
        let result = match action {
            VmAction::DeleteAndRecreate => self.cluster.delete_and_recreate(vm_id).await,
            VmAction::Delete => self.cluster.delete(vm_id).await,
            VmAction::Reschedule => self.cluster.reschedule(vm_id).await,
        };

        if let Err(e) = &result {
            error!(vm_id, %action, error = %e, "VM action failed");
        }

        let escalation = if action == VmAction::Reschedule {
            self.escalate_if_stuck(&vm).await
        } else {
            Escalation::NotNeeded
        };

        VmRemediation {
            vm_id,
            action,
            result: result.map_err(|e| e.to_string()),
            escalation,
            skipped: false,
        }
    }

    /// Push a wedged VM through failure, then retry, so the reschedule can
    /// take effect.
    async fn escalate_if_stuck(&self, vm: &VirtualMachine) -> Escalation {
        info!(vm_id = vm.id, lcm_state = %vm.lcm_state, state = %vm.state, "Checking VM lifecycle state");

        if !vm.lcm_state.is_stuck() {
            return Escalation::NotNeeded;
        }

        info!(vm_id = vm.id, "VM stuck, recovering as failure then retry");
        if let Err(e) = self.cluster.recover_as_failure(vm.id).await {
            return Self::escalation_failed(vm.id, "failure", &e);
        }

        tokio::time::sleep(self.recovery_grace).await;

        if let Err(e) = self.cluster.recover_as_retry(vm.id).await {
            return Self::escalation_failed(vm.id, "retry", &e);
        }

        info!(vm_id = vm.id, "VM recovered");
        Escalation::Recovered
    }

    fn escalation_failed(vm_id: u32, step: &str, e: &ClusterError) -> Escalation {
        warn!(vm_id, step, error = %e, "Recovery failed, recover the VM manually");
        Escalation::Failed(format!("recover as {step}: {e}"))
    }
}
