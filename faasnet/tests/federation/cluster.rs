use std::cell::{RefCell, RefMut};
use std::rc::Rc;
use std::time::Duration;

use faasnet::{
    ExecuteOutcome, FaasNode, ManifestEngine, Message, ModuleManifest, NodeConfig, QueryCompletion,
    QueryId,
};
use faasnet_core::PeerEndpoint;
use faasnet_sim::{NetworkConfiguration, SimScheduler, SimTransport, SimWorld};

pub type SimNode = FaasNode<ManifestEngine, SimTransport, SimScheduler>;

/// `count` nodes at 10.0.0.1.. sharing one engine, with datagram tracing on.
pub struct Cluster {
    pub sim: SimWorld,
    pub nodes: Vec<Rc<RefCell<SimNode>>>,
    pub endpoints: Vec<PeerEndpoint>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

impl Cluster {
    pub fn new(network: NetworkConfiguration, seed: u64, count: usize, config: NodeConfig) -> Self {
        init_tracing();
        let sim = SimWorld::new_with_network_config_and_seed(network, seed);
        sim.enable_datagram_trace();
        let engine = ManifestEngine::new();

        let mut nodes = Vec::new();
        let mut endpoints = Vec::new();
        for i in 0..count {
            let endpoint =
                PeerEndpoint::parse(&format!("10.0.0.{}:3000", i + 1)).expect("endpoint");
            let node = Rc::new(RefCell::new(FaasNode::new(
                engine.clone(),
                sim.transport(endpoint),
                sim.scheduler(endpoint),
                config.clone(),
            )));
            sim.register_process(endpoint, node.clone()).expect("register");
            nodes.push(node);
            endpoints.push(endpoint);
        }
        Self {
            sim,
            nodes,
            endpoints,
        }
    }

    /// Fixed 2ms links, no faults.
    pub fn reliable(count: usize, config: NodeConfig) -> Self {
        Self::new(
            NetworkConfiguration::point_to_point(Duration::from_millis(2)),
            1,
            count,
            config,
        )
    }

    pub fn node(&self, i: usize) -> RefMut<'_, SimNode> {
        self.nodes[i].borrow_mut()
    }

    /// Append `to` to the peer list of `from`.
    pub fn link(&self, from: usize, to: usize) {
        let endpoint = self.endpoints[to];
        self.node(from).register_node(endpoint);
    }

    pub fn host_sum(&self, i: usize) {
        let bytes = ModuleManifest::stock_sum().to_bytes().expect("bytes");
        self.node(i).register_module("sum", &bytes).expect("register");
    }

    /// Start `sum(a, b)` on node `i`, which must not have it cached.
    pub fn start_sum(&self, i: usize, a: i32, b: i32) -> QueryId {
        match self.node(i).execute_module("sum", "sum", a, b).expect("execute") {
            ExecuteOutcome::Pending(id) => id,
            ExecuteOutcome::Completed(v) => panic!("unexpected local hit: {v}"),
        }
    }

    pub fn run_for(&mut self, duration: Duration) {
        self.sim.run_for(duration);
    }

    pub fn completion(&self, i: usize, id: QueryId) -> Option<QueryCompletion> {
        self.node(i).take_completion(id)
    }

    pub fn index_of(&self, endpoint: PeerEndpoint) -> usize {
        self.endpoints
            .iter()
            .position(|e| *e == endpoint)
            .expect("known endpoint")
    }

    /// Every traced datagram as `(from index, to index, message)`.
    ///
    /// Frames are decoded as sent, before any in-flight corruption.
    pub fn messages(&self) -> Vec<(usize, usize, Message)> {
        self.sim
            .datagram_trace()
            .into_iter()
            .map(|record| {
                let (_, message) = Message::from_frame(&record.frame).expect("decode");
                (self.index_of(record.from), self.index_of(record.to), message)
            })
            .collect()
    }

    /// Message tags with direction, e.g. `"0>1 e"`.
    pub fn flow(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .map(|(from, to, message)| format!("{from}>{to} {}", message.tag()))
            .collect()
    }
}
