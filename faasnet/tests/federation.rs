//! Federation protocol integration tests.
//!
//! Small clusters of `FaasNode`s on the simulated network, checked through
//! their completions and the decoded datagram trace.

#[path = "federation/cluster.rs"]
mod cluster;
#[path = "federation/concurrency.rs"]
mod concurrency;
#[path = "federation/faults.rs"]
mod faults;
#[path = "federation/multi_hop.rs"]
mod multi_hop;
#[path = "federation/scenarios.rs"]
mod scenarios;
#[path = "federation/single_hop.rs"]
mod single_hop;
