use std::time::Duration;

use faasnet::{FederationError, ModuleName, NodeConfig, NodeState};

use crate::cluster::Cluster;

#[test]
fn relay_caches_on_the_way_back() {
    let mut cluster = Cluster::reliable(3, NodeConfig::default());
    cluster.host_sum(2);
    cluster.link(0, 1);
    cluster.link(1, 2);

    let id = cluster.start_sum(0, 3, 4);
    cluster.run_for(Duration::from_secs(1));

    assert_eq!(cluster.completion(0, id).expect("completed").result, Ok(7));
    assert_eq!(
        cluster.flow(),
        vec![
            "0>1 e", "1>2 e", "2>1 r", "1>2 l", "2>1 c", "1>0 r", "0>1 l", "1>0 c"
        ]
    );

    let sum = ModuleName::new("sum").expect("name");
    for i in 0..3 {
        assert!(cluster.node(i).engine().cache().is_registered(&sum));
        assert_eq!(cluster.node(i).state(), NodeState::Idle);
    }
    let relay = cluster.node(1).stats().clone();
    assert_eq!(relay.relays_started, 1);
    assert_eq!(relay.relays_resolved, 1);
}

#[test]
fn relay_is_busy_until_it_answers() {
    let mut cluster = Cluster::reliable(3, NodeConfig::default());
    cluster.host_sum(2);
    cluster.link(0, 1);
    cluster.link(1, 2);
    let id = cluster.start_sum(0, 1, 1);

    cluster.run_for(Duration::from_millis(3));
    assert!(matches!(
        cluster.node(1).state(),
        NodeState::Relaying { requester, .. } if requester == cluster.endpoints[0]
    ));

    cluster.run_for(Duration::from_secs(1));
    assert!(cluster.completion(0, id).is_some());
}

#[test]
fn exhausted_relay_answers_not_found() {
    let mut cluster = Cluster::reliable(2, NodeConfig::default());
    cluster.link(0, 1);

    let id = cluster.start_sum(0, 1, 1);
    cluster.run_for(Duration::from_secs(1));

    assert_eq!(cluster.flow(), vec!["0>1 e", "1>0 n"]);
    assert_eq!(
        cluster.completion(0, id).expect("completed").result,
        Err(FederationError::ModuleNotFoundAnywhere {
            module: ModuleName::new("sum").expect("name"),
        })
    );
    assert_eq!(cluster.node(1).stats().relays_exhausted, 1);
}

#[test]
fn empty_directory_fails_without_traffic() {
    let mut cluster = Cluster::reliable(1, NodeConfig::default());
    let id = cluster.start_sum(0, 1, 1);
    assert!(cluster.completion(0, id).expect("completed").result.is_err());
    cluster.run_for(Duration::from_secs(1));
    assert!(cluster.messages().is_empty());
}
