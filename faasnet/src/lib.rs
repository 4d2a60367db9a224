//! # faasnet
//!
//! Peer-to-peer function execution with on-demand module federation.
//!
//! Every node hosts a module cache over an [`ExecutionEngine`]. Asking a node
//! to run `module::function(a, b)` answers from the cache when it can;
//! otherwise the node asks its peers one by one, lets the first one that
//! answers run the call, then pulls that peer's bytecode so the next call is
//! local. Peers that lack the module relay the request further, caching it on
//! the way back.
//!
//! ## Layout
//!
//! - [`codec`] and [`wire`]: the five text messages and their checksummed
//!   datagram frame
//! - [`runtime`] and [`cache`]: the engine capability, an in-memory engine
//!   and the per-node cache on top of it
//! - [`federation`]: the sans-IO protocol state machine
//! - [`node`]: binds the state machine to a transport and a scheduler
//! - [`net`]: tokio UDP driver
//! - [`scenario`]: declarative simulations on `faasnet-sim`
//!
//! ## Example
//!
//! ```
//! use std::{cell::RefCell, rc::Rc};
//!
//! use faasnet::{FaasNode, ManifestEngine, ModuleManifest, NodeConfig};
//! use faasnet_core::PeerEndpoint;
//! use faasnet_sim::SimWorld;
//!
//! let mut sim = SimWorld::new_with_seed(1);
//! let engine = ManifestEngine::new();
//! let a = PeerEndpoint::parse("10.0.0.1:3000").expect("endpoint");
//! let b = PeerEndpoint::parse("10.0.0.2:3000").expect("endpoint");
//!
//! let client = Rc::new(RefCell::new(FaasNode::new(
//!     engine.clone(), sim.transport(a), sim.scheduler(a), NodeConfig::default(),
//! )));
//! let server = Rc::new(RefCell::new(FaasNode::new(
//!     engine, sim.transport(b), sim.scheduler(b), NodeConfig::default(),
//! )));
//! let sum = ModuleManifest::stock_sum().to_bytes().expect("bytes");
//! server.borrow_mut().register_module("sum", &sum).expect("register");
//! client.borrow_mut().register_node(b);
//! sim.register_process(a, client.clone()).expect("register");
//! sim.register_process(b, server).expect("register");
//!
//! let outcome = client.borrow_mut().execute_module("sum", "sum", 2, 3).expect("execute");
//! let faasnet::ExecuteOutcome::Pending(id) = outcome else { panic!("not cached yet") };
//! sim.run_for(std::time::Duration::from_secs(1));
//!
//! let completion = client.borrow_mut().take_completion(id).expect("done");
//! assert_eq!(completion.result, Ok(5));
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Per-node module cache.
pub mod cache;
/// Protocol messages and their text encoding.
pub mod codec;
/// Node configuration.
pub mod config;
/// Ordered peer list.
pub mod directory;
/// Crate-level error type.
pub mod error;
/// The federation protocol state machine.
pub mod federation;
/// Real-network drivers.
pub mod net;
/// Node driver over transport and scheduler providers.
pub mod node;
/// Execution engine capability and the in-memory manifest engine.
pub mod runtime;
/// Simulation scenarios.
pub mod scenario;
/// Validated names and identifiers.
pub mod types;
/// Datagram framing.
pub mod wire;

pub use cache::ModuleCache;
pub use codec::{CodecError, ExecuteRequest, Message};
pub use config::{DEFAULT_PORT, NodeConfig, NodeSettings};
pub use directory::PeerDirectory;
pub use error::{FederationError, FederationResult};
pub use federation::{
    Effect, ExecuteOutcome, FederatedQuery, FederationEngine, FederationStats, NodeState,
    QueryCompletion, Timer,
};
pub use net::{TokioScheduler, UdpNode, UdpTransport};
pub use node::FaasNode;
pub use runtime::{
    EngineError, ExecutionEngine, ManifestEngine, ModuleManifest, Operation, RuntimeHandle,
};
pub use scenario::{Scenario, ScenarioError, ScenarioReport, run_scenario};
pub use types::{FunctionName, ModuleName, NameError, QueryId};
pub use wire::{HEADER_SIZE, MAX_FRAME_SIZE, WireError};
