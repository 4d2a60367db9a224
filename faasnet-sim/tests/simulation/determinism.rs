use std::time::Duration;

use faasnet_sim::NetworkConfiguration;

use crate::ping_pong::run_ping_pong;

fn arrival_times(seed: u64) -> Vec<Duration> {
    let (_sim, _pinger, ponger) = run_ping_pong(NetworkConfiguration::wan_simulation(), seed, 20);
    let times = ponger.borrow().received.iter().map(|(t, _)| *t).collect();
    times
}

#[test]
fn same_seed_same_timeline() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();

    assert_eq!(arrival_times(42), arrival_times(42));
}

#[test]
fn different_seed_different_timeline() {
    assert_ne!(arrival_times(1), arrival_times(2));
}

#[test]
fn lossy_network_eventually_goes_quiet() {
    let (sim, _pinger, ponger) = run_ping_pong(NetworkConfiguration::lossy(0.3, 0.0), 8, 50);
    let metrics = sim.metrics();
    assert!(!sim.has_pending_events());
    assert_eq!(
        metrics.datagrams_sent,
        metrics.datagrams_delivered + metrics.datagrams_dropped
    );
    assert!(ponger.borrow().received.len() <= 51);
}
