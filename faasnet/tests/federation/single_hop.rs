use std::time::Duration;

use faasnet::{ExecuteOutcome, ModuleName, NodeConfig, NodeState};

use crate::cluster::Cluster;

#[test]
fn one_round_trip_then_local() {
    let mut cluster = Cluster::reliable(2, NodeConfig::default());
    cluster.host_sum(1);
    cluster.link(0, 1);

    let id = cluster.start_sum(0, 10, 10);
    cluster.run_for(Duration::from_secs(1));

    let completion = cluster.completion(0, id).expect("completed");
    assert_eq!(completion.result, Ok(20));
    assert_eq!(cluster.flow(), vec!["0>1 e", "1>0 r", "0>1 l", "1>0 c"]);

    // write-through: the module now lives on node 0
    assert_eq!(
        cluster.node(0).execute_module("sum", "sum", 1, 2),
        Ok(ExecuteOutcome::Completed(3))
    );
    cluster.run_for(Duration::from_secs(1));
    assert_eq!(cluster.messages().len(), 4);

    let sum = ModuleName::new("sum").expect("name");
    assert!(cluster.node(0).engine().cache().is_registered(&sum));
    assert_eq!(cluster.node(0).stats().modules_cached, 1);
    assert_eq!(cluster.node(1).stats().loads_served, 1);
    assert_eq!(cluster.node(0).state(), NodeState::Idle);
}

#[test]
fn local_hit_sends_nothing() {
    let mut cluster = Cluster::reliable(2, NodeConfig::default());
    cluster.host_sum(1);
    cluster.link(1, 0);

    assert_eq!(
        cluster.node(1).execute_module("sum", "sum", 7, -2),
        Ok(ExecuteOutcome::Completed(5))
    );
    cluster.run_for(Duration::from_secs(1));
    assert!(cluster.messages().is_empty());
}

#[test]
fn result_arrives_after_bytecode() {
    let mut cluster = Cluster::reliable(2, NodeConfig::default());
    cluster.host_sum(1);
    cluster.link(0, 1);
    let id = cluster.start_sum(0, 1, 1);

    // e and r have crossed the 2ms link, l is still in flight
    cluster.run_for(Duration::from_millis(5));
    assert!(cluster.completion(0, id).is_none());
    assert_eq!(
        cluster.node(0).state(),
        NodeState::ResolvedLocal { query: id, result: 2 }
    );

    cluster.run_for(Duration::from_millis(5));
    assert_eq!(cluster.completion(0, id).expect("completed").result, Ok(2));
}

#[test]
fn second_peer_is_polled_on_the_next_tick() {
    let mut cluster = Cluster::reliable(3, NodeConfig::default());
    cluster.host_sum(2);
    cluster.link(0, 1);
    cluster.link(0, 2);
    // node 1 has no peers, so it answers `n` straight away
    let id = cluster.start_sum(0, 4, 4);
    cluster.run_for(Duration::from_secs(1));

    assert_eq!(cluster.completion(0, id).expect("completed").result, Ok(8));
    assert_eq!(
        cluster.flow(),
        vec!["0>1 e", "1>0 n", "0>2 e", "2>0 r", "0>2 l", "2>0 c"]
    );
    // the second `e` waits for the 100ms tick
    let trace = cluster.sim.datagram_trace();
    assert_eq!(trace[2].sent_at, Duration::from_millis(100));
}
