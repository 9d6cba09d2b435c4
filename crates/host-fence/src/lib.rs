//! Host failure hook for OpenNebula clusters.
//!
//! Invoked by the cluster manager when a host enters an error state. The
//! hook waits a few monitoring cycles to confirm the host is really down,
//! power-cycles it through its BMC so it cannot keep running workloads, and
//! only then remediates the VMs last seen on it (reschedule, recreate or
//! delete).
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use host_fence::{FenceOrchestrator, HookConfig, HookRequest, OneCli, PowerFencer, ProcessRunner};
//!
//! let config = HookConfig::default();
//! let runner = Arc::new(ProcessRunner);
//! let cluster = Arc::new(OneCli::new(&config.cluster, runner.clone()));
//! let fencer = PowerFencer::new(config.fence.clone(), runner);
//!
//! let outcome = FenceOrchestrator::new(cluster, fencer, config.remediation)
//!     .run(&request)
//!     .await?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cluster;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fencing;
pub mod orchestrator;
pub mod reachability;
pub mod remediation;
pub mod runner;

pub use cluster::{ClusterApi, OneCli};
pub use config::HookConfig;
pub use error::{ClusterError, HookError};
pub use fencing::{FenceAttempt, FenceOutcome, PowerFencer};
pub use orchestrator::{FenceOrchestrator, HookOutcome, HookRequest};
pub use reachability::{Reachability, ReachabilityWaiter};
pub use remediation::{RemediationPlan, RemediationPlanner, RemediationPolicy, RemediationReport};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};
