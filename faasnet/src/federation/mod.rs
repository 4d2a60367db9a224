//! Peer-federated module discovery and execution.
//!
//! ## Protocol
//!
//! A node asked to run `module::function(a, b)`:
//!
//! 1. runs it immediately if `module` is cached;
//! 2. otherwise polls its peers one at a time, in registration order, with
//!    `e`. The next peer is only asked once the previous one answered `n`
//!    (or timed out, when reply timeouts are enabled), re-checked every tick;
//! 3. on the first `r` it stops polling, asks the same peer for the bytecode
//!    with `l`, caches the `c` it gets back and only then reports the result;
//! 4. with no peer left it reports `ModuleNotFoundAnywhere`.
//!
//! A node receiving `e` for a module it lacks runs the same algorithm as a
//! relay and answers the requester with `r` or `n` once it concludes. Every
//! hop therefore caches the module on the way back.
//!
//! ## Concurrency
//!
//! At most one query is in flight per node. Other requests wait in a bounded
//! FIFO and are replayed in order when it concludes; a remote request that
//! does not fit is answered `n` straight away.

mod engine;
mod query;
mod stats;

pub use engine::FederationEngine;
pub use query::{
    Effect, ExecuteOutcome, FederatedQuery, NodeState, Origin, Outstanding, Phase,
    QueryCompletion, Timer,
};
pub use stats::FederationStats;
