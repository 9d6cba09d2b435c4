mod common;

use std::time::Duration;

use tokio::time::Instant;

use common::{Call, FakeCluster};
use host_fence::cluster::HostState;
use host_fence::{Reachability, ReachabilityWaiter};

const INTERVAL: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn test_zero_repeat_skips_wait() {
    let cluster = FakeCluster::new(7, "node07");
    let start = Instant::now();

    let result = ReachabilityWaiter::new(&cluster, INTERVAL, 0).wait(7).await;

    assert!(matches!(result, Reachability::StillDown));
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(cluster.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_still_down_after_every_cycle() {
    let cluster = FakeCluster::new(7, "node07")
        .with_lookups(vec![Some(HostState::Error), Some(HostState::MonitoringError)]);
    let start = Instant::now();

    let result = ReachabilityWaiter::new(&cluster, INTERVAL, 2).wait(7).await;

    assert!(matches!(result, Reachability::StillDown));
    assert_eq!(start.elapsed(), Duration::from_secs(120));
    assert_eq!(cluster.calls(), vec![Call::GetHost(7), Call::GetHost(7)]);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_stops_wait_early() {
    let cluster = FakeCluster::new(7, "node07").with_lookups(vec![
        Some(HostState::Error),
        Some(HostState::Monitored),
        Some(HostState::Error),
    ]);
    let start = Instant::now();

    let result = ReachabilityWaiter::new(&cluster, INTERVAL, 4).wait(7).await;

    assert!(matches!(
        result,
        Reachability::Recovered(HostState::Monitored)
    ));
    assert_eq!(start.elapsed(), Duration::from_secs(120));
    assert_eq!(cluster.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_host_counts_as_recovered() {
    let cluster = FakeCluster::new(7, "node07").with_lookups(vec![Some(HostState::Disabled)]);

    let result = ReachabilityWaiter::new(&cluster, INTERVAL, 2).wait(7).await;

    assert!(matches!(result, Reachability::Recovered(HostState::Disabled)));
}

#[tokio::test(start_paused = true)]
async fn test_lookup_failure_is_indeterminate() {
    let cluster = FakeCluster::new(7, "node07").with_lookups(vec![Some(HostState::Error), None]);
    let start = Instant::now();

    let result = ReachabilityWaiter::new(&cluster, INTERVAL, 3).wait(7).await;

    assert!(matches!(result, Reachability::Indeterminate(_)));
    assert_eq!(start.elapsed(), Duration::from_secs(120));
}
