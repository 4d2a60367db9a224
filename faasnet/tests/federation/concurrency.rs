use std::time::Duration;

use faasnet::{FederationError, Message, NodeConfig, NodeState};

use crate::cluster::Cluster;

#[test]
fn second_request_waits_and_is_served() {
    // 0 and 2 both ask relay 1, which asks server 3
    let mut cluster = Cluster::reliable(4, NodeConfig::default());
    cluster.host_sum(3);
    cluster.link(0, 1);
    cluster.link(2, 1);
    cluster.link(1, 3);

    let first = cluster.start_sum(0, 1, 2);
    let second = cluster.start_sum(2, 5, 5);
    cluster.run_for(Duration::from_secs(1));

    assert_eq!(cluster.completion(0, first).expect("first").result, Ok(3));
    assert_eq!(cluster.completion(2, second).expect("second").result, Ok(10));

    let relay = cluster.node(1).stats().clone();
    assert_eq!(relay.requests_deferred, 1);
    assert_eq!(relay.requests_served, 1);
    assert_eq!(relay.relays_started, 1);
    // the server saw a single `e`: the deferred one was answered from cache
    let to_server = cluster
        .messages()
        .into_iter()
        .filter(|(_, to, m)| *to == 3 && matches!(m, Message::Execute(_)))
        .count();
    assert_eq!(to_server, 1);
}

#[test]
fn local_calls_queue_behind_the_active_query() {
    let mut cluster = Cluster::reliable(2, NodeConfig::default());
    cluster.host_sum(1);
    cluster.link(0, 1);

    let first = cluster.start_sum(0, 1, 1);
    let second = cluster.start_sum(0, 2, 2);
    assert_eq!(cluster.node(0).engine().deferred_len(), 1);
    cluster.run_for(Duration::from_secs(1));

    assert_eq!(cluster.completion(0, first).expect("first").result, Ok(2));
    assert_eq!(cluster.completion(0, second).expect("second").result, Ok(4));
    // one federation round only
    assert_eq!(cluster.messages().len(), 4);
}

#[test]
fn mutual_peers_stall_without_skip_requester() {
    let mut cluster = Cluster::reliable(2, NodeConfig::default());
    cluster.link(0, 1);
    cluster.link(1, 0);

    let id = cluster.start_sum(0, 1, 1);
    cluster.run_for(Duration::from_secs(5));

    // 1 relays back to 0, which is busy and parks the request
    assert!(cluster.completion(0, id).is_none());
    assert!(matches!(cluster.node(0).state(), NodeState::Querying { .. }));
    assert!(matches!(cluster.node(1).state(), NodeState::Relaying { .. }));
    assert_eq!(cluster.node(0).engine().deferred_len(), 1);
}

#[test]
fn skip_requester_breaks_mutual_peering() {
    let mut cluster = Cluster::reliable(2, NodeConfig::default().with_skip_requester(true));
    cluster.link(0, 1);
    cluster.link(1, 0);

    let id = cluster.start_sum(0, 1, 1);
    cluster.run_for(Duration::from_secs(1));

    assert!(matches!(
        cluster.completion(0, id).expect("completed").result,
        Err(FederationError::ModuleNotFoundAnywhere { .. })
    ));
    assert_eq!(cluster.flow(), vec!["0>1 e", "1>0 n"]);
    assert_eq!(cluster.node(1).state(), NodeState::Idle);
}

#[test]
fn full_queue_answers_not_found() {
    let config = NodeConfig::default().with_deferred_capacity(1);
    // 1, 2 and 3 all ask 0 while it waits on 4, which has nothing
    let mut cluster = Cluster::reliable(5, config);
    cluster.link(0, 4);
    for i in 1..4 {
        cluster.link(i, 0);
    }

    let own = cluster.start_sum(0, 0, 0);
    let ids: Vec<_> = (1..4).map(|i| cluster.start_sum(i, 1, 1)).collect();
    cluster.run_for(Duration::from_secs(1));

    assert!(cluster.completion(0, own).expect("own").result.is_err());
    assert_eq!(cluster.node(0).stats().requests_deferred, 1);
    assert_eq!(cluster.node(0).stats().requests_rejected, 2);
    for (i, id) in (1..4).zip(ids) {
        assert!(cluster.completion(i, id).expect("answered").result.is_err());
    }
}
