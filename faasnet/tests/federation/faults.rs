use std::time::Duration;

use faasnet::runtime::{ModuleManifest, Operation};
use faasnet::{FederationError, ModuleName, NodeConfig, NodeState};
use faasnet_core::PeerEndpoint;
use faasnet_sim::{LatencyRange, NetworkConfiguration};

use crate::cluster::Cluster;

fn timeouts() -> NodeConfig {
    NodeConfig::default()
        .with_tick_interval(Duration::from_millis(20))
        .with_reply_timeout(Duration::from_millis(50))
}

#[test]
fn corrupted_frames_are_dropped() {
    let network = NetworkConfiguration {
        latency: LatencyRange::fixed(Duration::from_millis(2)),
        ..NetworkConfiguration::lossy(0.0, 1.0)
    };
    let mut cluster = Cluster::new(network, 5, 2, timeouts());
    cluster.host_sum(1);
    cluster.link(0, 1);

    let id = cluster.start_sum(0, 1, 1);
    cluster.run_for(Duration::from_secs(1));

    // the only `e` arrived damaged: node 1 never answered
    assert_eq!(cluster.node(1).stats().frames_malformed, 1);
    assert_eq!(cluster.node(1).stats().frames_received, 0);
    assert!(matches!(
        cluster.completion(0, id).expect("completed").result,
        Err(FederationError::ModuleNotFoundAnywhere { .. })
    ));
    assert_eq!(cluster.sim.metrics().datagrams_corrupted, 1);
}

#[test]
fn unreachable_peer_is_skipped_after_timeout() {
    let config = NodeConfig::default().with_reply_timeout(Duration::from_millis(300));
    let mut cluster = Cluster::reliable(2, config);
    cluster.host_sum(1);
    let dead = PeerEndpoint::parse("10.9.9.9:3000").expect("endpoint");
    cluster.node(0).register_node(dead);
    cluster.link(0, 1);

    let id = cluster.start_sum(0, 2, 2);
    cluster.run_for(Duration::from_secs(1));

    assert_eq!(cluster.completion(0, id).expect("completed").result, Ok(4));
    assert_eq!(cluster.node(0).stats().reply_timeouts, 1);
    assert_eq!(cluster.sim.metrics().datagrams_undeliverable, 1);
}

#[test]
fn unreachable_peer_stalls_without_timeout() {
    let mut cluster = Cluster::reliable(2, NodeConfig::default());
    cluster.host_sum(1);
    let dead = PeerEndpoint::parse("10.9.9.9:3000").expect("endpoint");
    cluster.node(0).register_node(dead);
    cluster.link(0, 1);

    let id = cluster.start_sum(0, 2, 2);
    cluster.run_for(Duration::from_secs(10));

    assert!(cluster.completion(0, id).is_none());
    assert!(matches!(
        cluster.node(0).state(),
        NodeState::Querying { cursor: 1, .. }
    ));
}

#[test]
fn partitioned_server_times_out() {
    let mut cluster = Cluster::reliable(2, timeouts());
    cluster.host_sum(1);
    cluster.link(0, 1);
    cluster.sim.partition_pair(
        cluster.endpoints[0].ip,
        cluster.endpoints[1].ip,
        Duration::from_secs(10),
    );

    let id = cluster.start_sum(0, 1, 1);
    cluster.run_for(Duration::from_secs(1));
    assert!(cluster.completion(0, id).expect("completed").result.is_err());
    assert_eq!(cluster.sim.metrics().datagrams_partitioned, 1);
}

#[test]
fn lost_bytecode_still_delivers_the_result() {
    let mut cluster = Cluster::reliable(2, timeouts());
    cluster.host_sum(1);
    cluster.link(0, 1);
    // only the server's replies are cut, and only after `r` has gone out
    let id = cluster.start_sum(0, 6, 7);
    cluster.run_for(Duration::from_millis(3));
    cluster.sim.partition_pair(
        cluster.endpoints[1].ip,
        cluster.endpoints[0].ip,
        Duration::from_secs(10),
    );
    cluster.run_for(Duration::from_secs(1));

    assert_eq!(cluster.completion(0, id).expect("completed").result, Ok(13));
    let sum = ModuleName::new("sum").expect("name");
    assert!(!cluster.node(0).engine().cache().is_registered(&sum));
}

#[test]
fn lossy_network_never_returns_a_wrong_value() {
    let network = NetworkConfiguration {
        latency: LatencyRange::new(Duration::from_millis(1), Duration::from_millis(5)),
        ..NetworkConfiguration::lossy(0.3, 0.05)
    };

    let mut resolved = 0;
    for seed in 1..=20 {
        let mut cluster = Cluster::new(network.clone(), seed, 2, timeouts());
        cluster.host_sum(1);
        // retries through duplicate registrations
        for _ in 0..3 {
            cluster.link(0, 1);
        }

        let id = cluster.start_sum(0, 20, 22);
        cluster.run_for(Duration::from_secs(2));

        let completion = cluster.completion(0, id).expect("timeouts always conclude");
        match completion.result {
            Ok(value) => {
                assert_eq!(value, 42, "seed {seed}");
                resolved += 1;
            }
            Err(err) => assert!(
                matches!(err, FederationError::ModuleNotFoundAnywhere { .. }),
                "seed {seed}: {err}"
            ),
        }
        assert_eq!(cluster.node(0).state(), NodeState::Idle, "seed {seed}");
    }
    assert!(resolved > 0);
}

#[test]
fn oversized_module_is_refused_and_result_delivered() {
    // default config: no reply timeout to fall back on
    let mut cluster = Cluster::reliable(2, NodeConfig::default());
    let manifest = (0..5_000).fold(ModuleManifest::stock_sum(), |m, i| {
        m.with_function(format!("pad{i:05}"), Operation::Max)
    });
    let bytes = manifest.to_bytes().expect("bytes");
    assert!(bytes.len() > 65_507);
    cluster.node(1).register_module("sum", &bytes).expect("register");
    cluster.link(0, 1);

    let id = cluster.start_sum(0, 2, 3);
    cluster.run_for(Duration::from_secs(60));

    assert_eq!(cluster.completion(0, id).expect("completed").result, Ok(5));
    assert_eq!(cluster.flow(), vec!["0>1 e", "1>0 r", "0>1 l", "1>0 n"]);
    assert_eq!(cluster.node(0).state(), NodeState::Idle);
    let sum = ModuleName::new("sum").expect("name");
    assert!(!cluster.node(0).engine().cache().is_registered(&sum));

    let server = cluster.node(1).stats().clone();
    assert_eq!(server.loads_oversized, 1);
    assert_eq!(server.loads_served, 0);
    assert_eq!(server.driver_failures, 0);
}
