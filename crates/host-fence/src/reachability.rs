//! Confirmation wait before fencing.
//!
//! A host reported as failed may only have missed a monitoring round. The
//! waiter sleeps through a number of monitoring cycles and re-reads the
//! host state after each one.

use std::time::Duration;

use tracing::{info, warn};

use crate::cluster::{ClusterApi, HostState};
use crate::error::ClusterError;

/// Result of the confirmation wait.
#[derive(Debug)]
pub enum Reachability {
    /// The host left the down states on its own. Nothing must be fenced.
    Recovered(HostState),
    /// The host stayed down for every sampled cycle, or no wait was asked for.
    StillDown,
    /// The host state could not be read. Fencing on missing data is unsafe.
    Indeterminate(ClusterError),
}

/// Polls host state across monitoring cycles.
pub struct ReachabilityWaiter<'a> {
    cluster: &'a dyn ClusterApi,
    interval: Duration,
    repeat: u32,
}

impl<'a> ReachabilityWaiter<'a> {
    /// Create a waiter sampling `repeat` cycles of `interval` each.
    #[must_use]
    pub fn new(cluster: &'a dyn ClusterApi, interval: Duration, repeat: u32) -> Self {
        Self {
            cluster,
            interval,
            repeat,
        }
    }

    /// Sleep one interval per cycle and re-read the host after each sleep,
    /// returning as soon as the host is seen up.
    pub async fn wait(&self, host_id: u32) -> Reachability {
        if self.repeat == 0 {
            info!("Reachability wait disabled, fencing without confirmation");
            return Reachability::StillDown;
        }

        info!(
            cycles = self.repeat,
            interval_secs = self.interval.as_secs(),
            total_secs = self.interval.as_secs() * u64::from(self.repeat),
            "Waiting for monitoring cycles before fencing"
        );

        for cycle in 1..=self.repeat {
            tokio::time::sleep(self.interval).await;

            let host = match self.cluster.get_host(host_id).await {
                Ok(host) => host,
                Err(e) => {
                    warn!(cycle, error = %e, "Could not refresh host state, aborting fencing");
                    return Reachability::Indeterminate(e);
                }
            };

            if !host.state.is_down() {
                warn!(cycle, state = %host.state, "Host came back, fencing aborted");
                return Reachability::Recovered(host.state);
            }

            info!(
                cycle,
                remaining = self.repeat - cycle,
                state = %host.state,
                "Host still down"
            );
        }

        Reachability::StillDown
    }
}
