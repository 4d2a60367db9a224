use faasnet::scenario::{InvocationOutcome, Scenario, run_scenario};

use crate::cluster::init_tracing;

#[test]
fn builtins_meet_their_expectations() {
    init_tracing();
    for name in Scenario::builtin_names() {
        let scenario = Scenario::builtin(name).expect("builtin");
        for seed in 1..=5 {
            let report = run_scenario(&scenario, seed).expect("run");
            assert!(report.all_expectations_met(), "{name} seed {seed}:\n{report}");
        }
    }
}

#[test]
fn wifi_chain_pulls_sum_through_every_hop() {
    init_tracing();
    let report = run_scenario(&Scenario::wifi_chain(), 1).expect("run");

    // four 40ms hops out, then r/l/c back at each hop
    assert_eq!(report.invocations[0].completed_at_ms, Some(2_640));
    // later calls are answered from the cache at call time
    for inv in &report.invocations[1..] {
        assert_eq!(inv.completed_at_ms, Some(inv.invoked_at_ms), "{}", inv.call);
    }
    for node in &report.nodes {
        assert!(
            node.cached_modules.contains(&"sum".to_string()),
            "{} did not cache sum",
            node.name
        );
        assert_eq!(node.state, "idle");
    }
    let ap = report.nodes.iter().find(|n| n.name == "ap").expect("ap");
    assert_eq!(ap.stats.relays_resolved, 1);
}

#[test]
fn same_seed_same_report() {
    let scenario = Scenario::wifi_mesh();
    let a = run_scenario(&scenario, 9).expect("run");
    let b = run_scenario(&scenario, 9).expect("run");
    assert_eq!(a, b);
}

#[test]
fn fallback_file_runs() {
    init_tracing();
    let scenario =
        Scenario::from_json(include_str!("../../scenarios/fallback.json")).expect("parse");
    let report = run_scenario(&scenario, 1).expect("run");
    assert!(report.all_expectations_met(), "{report}");

    assert!(matches!(
        report.invocations[1].outcome,
        InvocationOutcome::Failed { not_found: true, .. }
    ));
    let edge = &report.nodes[1];
    assert_eq!(edge.cached_modules, vec!["calc".to_string()]);
    assert_eq!(edge.stats.relays_exhausted, 2);

    let json = serde_json::to_value(&report).expect("serialize");
    assert_eq!(json["invocations"][0]["outcome"]["status"], "completed");
    assert_eq!(json["invocations"][0]["outcome"]["result"], 5);
}
