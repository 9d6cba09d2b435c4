//! Cluster manager seam.
//!
//! The hook reads host and VM snapshots and issues VM lifecycle commands
//! through [`ClusterApi`]. [`OneCli`] implements it on top of the OpenNebula
//! command-line tools.

mod models;
mod one;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ClusterError;

pub use models::{Host, HostState, LcmState, VirtualMachine, VmState};
pub use one::OneCli;

/// Operations the hook needs from the cluster manager.
///
/// Every read is a possibly stale snapshot. Mutating calls carry no
/// guarantee beyond their own success or failure.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a fresh host snapshot.
    async fn get_host(&self, id: u32) -> Result<Host, ClusterError>;

    /// Length of one host monitoring cycle.
    async fn monitoring_interval(&self) -> Result<Duration, ClusterError>;

    /// VMs whose last history record is on `host_name` and whose state is
    /// ACTIVE, or SUSPENDED when `include_suspended` is set.
    async fn list_vms_last_seen_on(
        &self,
        host_name: &str,
        include_suspended: bool,
    ) -> Result<Vec<VirtualMachine>, ClusterError>;

    /// Fetch a fresh VM snapshot.
    async fn refresh_vm(&self, id: u32) -> Result<VirtualMachine, ClusterError>;

    /// Delete the VM and resubmit its definition for scheduling.
    async fn delete_and_recreate(&self, id: u32) -> Result<(), ClusterError>;

    /// Delete the VM without resubmission.
    async fn delete(&self, id: u32) -> Result<(), ClusterError>;

    /// Ask the scheduler to place the VM again.
    async fn reschedule(&self, id: u32) -> Result<(), ClusterError>;

    /// Force the VM through its failure transition.
    async fn recover_as_failure(&self, id: u32) -> Result<(), ClusterError>;

    /// Retry the VM's last lifecycle operation.
    async fn recover_as_retry(&self, id: u32) -> Result<(), ClusterError>;
}
