//! Declarative simulation scenarios.
//!
//! A [`Scenario`] names a set of nodes, what each one hosts, whom each one
//! knows, and a timeline of invocations. [`run_scenario`] builds it on a
//! [`SimWorld`], plays the timeline and reports what every call returned.
//!
//! ```
//! use faasnet::scenario::{Scenario, run_scenario};
//!
//! let scenario = Scenario::builtin("point-to-point").expect("builtin");
//! let report = run_scenario(&scenario, 1).expect("run");
//! assert!(report.all_expectations_met());
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use faasnet_core::PeerEndpoint;
use faasnet_sim::{
    LatencyRange, NetworkConfiguration, SimScheduler, SimTransport, SimWorld, SimulationError,
    SimulationMetrics,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::{DEFAULT_PORT, NodeConfig, NodeSettings};
use crate::error::FederationError;
use crate::federation::{ExecuteOutcome, FederationStats};
use crate::node::FaasNode;
use crate::runtime::{ManifestEngine, ModuleManifest};
use crate::types::{ModuleName, NameError, QueryId};

type SimNode = FaasNode<ManifestEngine, SimTransport, SimScheduler>;

/// Errors loading or running a scenario.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// The scenario file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that was read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The scenario is not valid JSON for [`Scenario`].
    #[error("invalid scenario: {0}")]
    Json(#[from] serde_json::Error),
    /// No built-in scenario has this name.
    #[error("unknown built-in scenario {0:?}")]
    UnknownBuiltin(String),
    /// Two nodes share a name.
    #[error("duplicate node name {0:?}")]
    DuplicateNode(String),
    /// Two nodes share an endpoint.
    #[error("duplicate endpoint {0}")]
    DuplicateEndpoint(PeerEndpoint),
    /// A peer list or invocation names a node that does not exist.
    #[error("unknown node {0:?}")]
    UnknownNode(String),
    /// A node hosts a module that is not defined.
    #[error("node {node:?} hosts undefined module {module:?}")]
    UnknownModule {
        /// Hosting node.
        node: String,
        /// Missing module.
        module: String,
    },
    /// An invocation is scheduled after the scenario ends.
    #[error("invocation at {at_ms}ms is after the end of the run ({duration_ms}ms)")]
    InvocationAfterEnd {
        /// Invocation time.
        at_ms: u64,
        /// Scenario duration.
        duration_ms: u64,
    },
    /// A module or function name is invalid.
    #[error(transparent)]
    InvalidName(#[from] NameError),
    /// A node rejected its initial setup.
    #[error(transparent)]
    Federation(#[from] FederationError),
    /// The simulation refused the topology.
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Shared network behaviour of every link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkProfile {
    /// Base one-way latency.
    pub latency_ms: u64,
    /// Extra uniform jitter on top of the base latency.
    pub jitter_ms: u64,
    /// Probability a datagram is lost.
    pub drop_probability: f64,
    /// Probability a datagram arrives with a flipped bit.
    pub corruption_probability: f64,
}

impl Default for NetworkProfile {
    fn default() -> Self {
        Self {
            latency_ms: 2,
            jitter_ms: 0,
            drop_probability: 0.0,
            corruption_probability: 0.0,
        }
    }
}

impl NetworkProfile {
    /// The simulator configuration for this profile.
    pub fn to_configuration(&self) -> NetworkConfiguration {
        NetworkConfiguration {
            latency: LatencyRange::new(
                Duration::from_millis(self.latency_ms),
                Duration::from_millis(self.jitter_ms),
            ),
            drop_probability: self.drop_probability,
            corruption_probability: self.corruption_probability,
            ..NetworkConfiguration::default()
        }
    }
}

/// One node of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    /// Name used by peer lists and invocations.
    pub name: String,
    /// Address the node listens on.
    pub endpoint: PeerEndpoint,
    /// Modules registered before traffic starts.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Peers in polling order, by node name.
    #[serde(default)]
    pub peers: Vec<String>,
}

/// What an invocation is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// This exact value.
    Result(i32),
    /// No peer could resolve the module.
    NotFound,
}

/// A call made on one node at a given time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Invocation {
    /// Simulated time of the call.
    pub at_ms: u64,
    /// Calling node.
    pub node: String,
    /// Module to run.
    pub module: String,
    /// Exported function.
    pub function: String,
    /// First argument.
    pub arg1: i32,
    /// Second argument.
    pub arg2: i32,
    /// Expected outcome, checked in the report.
    #[serde(default)]
    pub expect: Option<Expectation>,
}

/// A complete simulation setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Short identifier.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub description: String,
    /// Module definitions by name.
    pub modules: BTreeMap<String, ModuleManifest>,
    /// Nodes, created in this order.
    pub nodes: Vec<NodeSpec>,
    /// Calls to make.
    pub invocations: Vec<Invocation>,
    /// Link behaviour.
    #[serde(default)]
    pub network: NetworkProfile,
    /// Configuration shared by every node.
    #[serde(default)]
    pub node_settings: NodeSettings,
    /// Simulated run length.
    pub duration_ms: u64,
}

const BUILTINS: &[&str] = &["point-to-point", "wifi-chain", "wifi-mesh"];

fn stock_modules() -> BTreeMap<String, ModuleManifest> {
    BTreeMap::from([
        ("sum".to_string(), ModuleManifest::stock_sum()),
        ("div".to_string(), ModuleManifest::stock_div()),
    ])
}

fn node(name: &str, ip: [u8; 4], modules: &[&str], peers: &[&str]) -> NodeSpec {
    NodeSpec {
        name: name.to_string(),
        endpoint: PeerEndpoint::new(IpAddr::from(ip), DEFAULT_PORT),
        modules: modules.iter().map(|m| m.to_string()).collect(),
        peers: peers.iter().map(|p| p.to_string()).collect(),
    }
}

fn invoke(at_ms: u64, node: &str, module: &str, args: (i32, i32), expect: i32) -> Invocation {
    Invocation {
        at_ms,
        node: node.to_string(),
        module: module.to_string(),
        function: module.to_string(),
        arg1: args.0,
        arg2: args.1,
        expect: Some(Expectation::Result(expect)),
    }
}

impl Scenario {
    /// Parse a scenario from JSON.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or unknown fields.
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a scenario file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Names accepted by [`Scenario::builtin`].
    pub fn builtin_names() -> &'static [&'static str] {
        BUILTINS
    }

    /// A built-in scenario by name.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::UnknownBuiltin`] for other names.
    pub fn builtin(name: &str) -> Result<Self, ScenarioError> {
        match name {
            "point-to-point" => Ok(Self::point_to_point()),
            "wifi-chain" => Ok(Self::wifi_chain()),
            "wifi-mesh" => Ok(Self::wifi_mesh()),
            other => Err(ScenarioError::UnknownBuiltin(other.to_string())),
        }
    }

    /// Two nodes on a 2ms link, each hosting one module; the first calls
    /// the other's.
    pub fn point_to_point() -> Self {
        Self {
            name: "point-to-point".to_string(),
            description: "node0 hosts sum, node1 hosts div; node0 runs div".to_string(),
            modules: stock_modules(),
            nodes: vec![
                node("node0", [10, 1, 1, 1], &["sum"], &["node1"]),
                node("node1", [10, 1, 1, 2], &["div"], &["node0"]),
            ],
            invocations: vec![invoke(3_000, "node0", "div", (10, 10), 1)],
            network: NetworkProfile::default(),
            node_settings: NodeSettings::default(),
            duration_ms: 10_000,
        }
    }

    /// A server behind an access point, and three wireless nodes in a chain
    /// hanging off it. The far end of the chain pulls `sum` through every hop.
    pub fn wifi_chain() -> Self {
        Self {
            name: "wifi-chain".to_string(),
            description: "server <-> ap <- wifi0 <-> wifi1 <-> wifi2, 40ms links".to_string(),
            modules: stock_modules(),
            nodes: vec![
                node("server", [10, 1, 1, 1], &["sum", "div"], &["ap"]),
                node("ap", [10, 1, 1, 2], &[], &["server"]),
                node("wifi0", [10, 1, 3, 1], &[], &["ap", "wifi1"]),
                node("wifi1", [10, 1, 3, 2], &[], &["wifi0", "wifi2"]),
                node("wifi2", [10, 1, 3, 3], &[], &["wifi1"]),
            ],
            invocations: vec![
                invoke(2_000, "wifi2", "sum", (10, 10), 20),
                invoke(3_000, "wifi0", "sum", (20, 20), 40),
                invoke(4_000, "wifi1", "sum", (30, 30), 60),
                invoke(5_000, "wifi2", "sum", (40, 40), 80),
            ],
            network: NetworkProfile {
                latency_ms: 40,
                ..NetworkProfile::default()
            },
            node_settings: NodeSettings::default(),
            duration_ms: 10_000,
        }
    }

    /// Wireless nodes that all know each other and the access point.
    pub fn wifi_mesh() -> Self {
        Self {
            name: "wifi-mesh".to_string(),
            description: "server <-> ap, wifi nodes meshed behind ap".to_string(),
            modules: stock_modules(),
            nodes: vec![
                node("server", [10, 1, 1, 1], &["sum", "div"], &["ap"]),
                node("ap", [10, 1, 1, 2], &[], &["server"]),
                node("wifi0", [10, 1, 3, 1], &[], &["ap", "wifi1", "wifi2"]),
                node("wifi1", [10, 1, 3, 2], &[], &["ap", "wifi0", "wifi2"]),
                node("wifi2", [10, 1, 3, 3], &[], &["ap", "wifi0", "wifi1"]),
            ],
            invocations: vec![invoke(2_000, "wifi0", "div", (10, 10), 1)],
            network: NetworkProfile {
                latency_ms: 2,
                jitter_ms: 3,
                ..NetworkProfile::default()
            },
            node_settings: NodeSettings::default(),
            duration_ms: 10_000,
        }
    }

    /// Check cross references.
    ///
    /// # Errors
    ///
    /// Reports the first inconsistency found.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let mut names = HashSet::new();
        let mut endpoints = HashSet::new();
        for node_spec in &self.nodes {
            if !names.insert(node_spec.name.as_str()) {
                return Err(ScenarioError::DuplicateNode(node_spec.name.clone()));
            }
            if !endpoints.insert(node_spec.endpoint) {
                return Err(ScenarioError::DuplicateEndpoint(node_spec.endpoint));
            }
        }

        for name in self.modules.keys() {
            ModuleName::new(name.as_str())?;
        }
        for node_spec in &self.nodes {
            if let Some(peer) = node_spec.peers.iter().find(|p| !names.contains(p.as_str())) {
                return Err(ScenarioError::UnknownNode(peer.clone()));
            }
            if let Some(module) = node_spec.modules.iter().find(|m| !self.modules.contains_key(*m)) {
                return Err(ScenarioError::UnknownModule {
                    node: node_spec.name.clone(),
                    module: module.clone(),
                });
            }
        }
        for invocation in &self.invocations {
            if !names.contains(invocation.node.as_str()) {
                return Err(ScenarioError::UnknownNode(invocation.node.clone()));
            }
            if invocation.at_ms > self.duration_ms {
                return Err(ScenarioError::InvocationAfterEnd {
                    at_ms: invocation.at_ms,
                    duration_ms: self.duration_ms,
                });
            }
        }
        Ok(())
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// The function returned a value.
    Completed {
        /// Returned value.
        result: i32,
    },
    /// The call failed.
    Failed {
        /// Error message.
        error: String,
        /// Whether the failure is "no peer has the module".
        not_found: bool,
    },
    /// No answer by the end of the run.
    Pending,
}

/// Result of one [`Invocation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationReport {
    /// Calling node.
    pub node: String,
    /// `module::function(a, b)`.
    pub call: String,
    /// Simulated time of the call.
    pub invoked_at_ms: u64,
    /// Simulated time of the answer.
    pub completed_at_ms: Option<u64>,
    /// Outcome.
    pub outcome: InvocationOutcome,
    /// Expected outcome, if any.
    pub expect: Option<Expectation>,
}

impl InvocationReport {
    /// Whether the outcome matches the expectation. Calls without one always
    /// pass.
    pub fn expectation_met(&self) -> bool {
        match (self.expect, &self.outcome) {
            (None, _) => true,
            (Some(Expectation::Result(want)), InvocationOutcome::Completed { result }) => {
                want == *result
            }
            (Some(Expectation::NotFound), InvocationOutcome::Failed { not_found, .. }) => {
                *not_found
            }
            _ => false,
        }
    }
}

/// End state of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    /// Node name.
    pub name: String,
    /// Node address.
    pub endpoint: PeerEndpoint,
    /// Protocol state at the end of the run.
    pub state: String,
    /// Scenario modules present in the node's cache.
    pub cached_modules: Vec<String>,
    /// Protocol counters.
    pub stats: FederationStats,
}

/// Everything a scenario run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// Scenario name.
    pub scenario: String,
    /// Simulation seed.
    pub seed: u64,
    /// Per invocation, in execution order.
    pub invocations: Vec<InvocationReport>,
    /// Per node, in declaration order.
    pub nodes: Vec<NodeReport>,
    /// Simulator counters.
    pub metrics: SimulationMetrics,
}

impl ScenarioReport {
    /// Whether every invocation produced what it expected.
    pub fn all_expectations_met(&self) -> bool {
        self.invocations.iter().all(InvocationReport::expectation_met)
    }
}

impl std::fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "scenario {} (seed {})", self.scenario, self.seed)?;
        for inv in &self.invocations {
            let outcome = match &inv.outcome {
                InvocationOutcome::Completed { result } => format!("= {result}"),
                InvocationOutcome::Failed { error, .. } => format!("failed: {error}"),
                InvocationOutcome::Pending => "no answer".to_string(),
            };
            let at = inv
                .completed_at_ms
                .map(|t| format!(" at {t}ms"))
                .unwrap_or_default();
            let check = if inv.expectation_met() { "ok" } else { "MISMATCH" };
            writeln!(
                f,
                "  [{check}] {}ms {} {} {outcome}{at}",
                inv.invoked_at_ms, inv.node, inv.call
            )?;
        }
        for node in &self.nodes {
            writeln!(
                f,
                "  {} {} {} cached=[{}] sent={} received={} malformed={}",
                node.name,
                node.endpoint,
                node.state,
                node.cached_modules.join(","),
                node.stats.frames_sent,
                node.stats.frames_received,
                node.stats.frames_malformed
            )?;
        }
        write!(
            f,
            "  network: sent={} delivered={} dropped={} corrupted={} time={:?}",
            self.metrics.datagrams_sent,
            self.metrics.datagrams_delivered,
            self.metrics.datagrams_dropped,
            self.metrics.datagrams_corrupted,
            self.metrics.simulated_time
        )
    }
}

struct Running {
    name: String,
    endpoint: PeerEndpoint,
    node: Rc<RefCell<SimNode>>,
    completed_at: Rc<RefCell<HashMap<QueryId, Duration>>>,
}

enum Started {
    Done(InvocationOutcome),
    Waiting(QueryId),
}

fn failed(err: &FederationError) -> InvocationOutcome {
    InvocationOutcome::Failed {
        error: err.to_string(),
        not_found: matches!(err, FederationError::ModuleNotFoundAnywhere { .. }),
    }
}

/// Build `scenario` on a fresh simulation seeded with `seed` and play it.
///
/// Every node shares one [`ManifestEngine`], each with its own runtime.
///
/// # Errors
///
/// Fails if the scenario is inconsistent or a node rejects its setup.
/// Failed invocations are reported, not returned as errors.
#[instrument(skip(scenario), fields(scenario = %scenario.name))]
pub fn run_scenario(scenario: &Scenario, seed: u64) -> Result<ScenarioReport, ScenarioError> {
    scenario.validate()?;

    let mut sim =
        SimWorld::new_with_network_config_and_seed(scenario.network.to_configuration(), seed);
    let engine = ManifestEngine::new();
    let config = NodeConfig::from(scenario.node_settings.clone());

    let endpoints: HashMap<&str, PeerEndpoint> = scenario
        .nodes
        .iter()
        .map(|node_spec| (node_spec.name.as_str(), node_spec.endpoint))
        .collect();

    let mut running = Vec::with_capacity(scenario.nodes.len());
    for node_spec in &scenario.nodes {
        let mut node = FaasNode::new(
            engine.clone(),
            sim.transport(node_spec.endpoint),
            sim.scheduler(node_spec.endpoint),
            config.clone(),
        );
        for module in &node_spec.modules {
            if let Some(manifest) = scenario.modules.get(module) {
                node.register_module(module, &manifest.to_bytes()?)?;
            }
        }
        for peer in &node_spec.peers {
            if let Some(endpoint) = endpoints.get(peer.as_str()) {
                node.register_node(*endpoint);
            }
        }

        let completed_at = Rc::new(RefCell::new(HashMap::new()));
        let hook_times = completed_at.clone();
        let clock = sim.downgrade();
        node.set_on_complete(move |completion| {
            let now = clock.current_time().unwrap_or_default();
            hook_times.borrow_mut().insert(completion.id, now);
        });

        let node = Rc::new(RefCell::new(node));
        sim.register_process(node_spec.endpoint, node.clone())?;
        running.push(Running {
            name: node_spec.name.clone(),
            endpoint: node_spec.endpoint,
            node,
            completed_at,
        });
    }

    let mut timeline: Vec<&Invocation> = scenario.invocations.iter().collect();
    timeline.sort_by_key(|inv| inv.at_ms);

    let mut started = Vec::with_capacity(timeline.len());
    for invocation in timeline {
        sim.run_until(Duration::from_millis(invocation.at_ms));
        let Some(target) = running.iter().find(|r| r.name == invocation.node) else {
            return Err(ScenarioError::UnknownNode(invocation.node.clone()));
        };
        let result = target.node.borrow_mut().execute_module(
            &invocation.module,
            &invocation.function,
            invocation.arg1,
            invocation.arg2,
        );
        let state = match result {
            Ok(ExecuteOutcome::Completed(result)) => {
                Started::Done(InvocationOutcome::Completed { result })
            }
            Ok(ExecuteOutcome::Pending(id)) => Started::Waiting(id),
            Err(err) => Started::Done(failed(&err)),
        };
        info!(node = %invocation.node, module = %invocation.module, at_ms = invocation.at_ms, "invoked");
        started.push((invocation, target, state));
    }

    sim.run_until(Duration::from_millis(scenario.duration_ms));

    let invocations = started
        .into_iter()
        .map(|(invocation, target, state)| {
            let (outcome, completed_at_ms) = match state {
                Started::Done(outcome) => (outcome, Some(invocation.at_ms)),
                Started::Waiting(id) => {
                    let at = target
                        .completed_at
                        .borrow()
                        .get(&id)
                        .map(|t| t.as_millis() as u64);
                    match target.node.borrow_mut().take_completion(id) {
                        Some(completion) => match completion.result {
                            Ok(result) => (InvocationOutcome::Completed { result }, at),
                            Err(err) => (failed(&err), at),
                        },
                        None => (InvocationOutcome::Pending, None),
                    }
                }
            };
            InvocationReport {
                node: invocation.node.clone(),
                call: format!(
                    "{}::{}({}, {})",
                    invocation.module, invocation.function, invocation.arg1, invocation.arg2
                ),
                invoked_at_ms: invocation.at_ms,
                completed_at_ms,
                outcome,
                expect: invocation.expect,
            }
        })
        .collect();

    let nodes = running
        .iter()
        .map(|r| {
            let node = r.node.borrow();
            let cached_modules = scenario
                .modules
                .keys()
                .filter(|name| {
                    ModuleName::new(name.as_str())
                        .is_ok_and(|m| node.engine().cache().is_registered(&m))
                })
                .cloned()
                .collect();
            NodeReport {
                name: r.name.clone(),
                endpoint: r.endpoint,
                state: node.state().to_string(),
                cached_modules,
                stats: node.stats().clone(),
            }
        })
        .collect();

    let report = ScenarioReport {
        scenario: scenario.name.clone(),
        seed,
        invocations,
        nodes,
        metrics: sim.metrics(),
    };
    info!(met = report.all_expectations_met(), "scenario finished");
    Ok(report)
}
