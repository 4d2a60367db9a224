//! # faasnet core
//!
//! Shared vocabulary between the federation protocol and whatever drives it.
//!
//! A node is a single-threaded, callback-driven state machine. It never owns
//! a socket or a clock directly; instead it talks to two providers:
//!
//! - [`Transport`]: fire-and-forget datagrams to a [`PeerEndpoint`]
//! - [`Scheduler`]: one-shot timers identified by a [`TimerToken`]
//!
//! and is driven through the [`Process`] callbacks. The simulation crate and
//! the tokio UDP driver both implement these, so the same protocol code runs
//! deterministically in tests and on a real network.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Provider traits for transport, scheduling and process callbacks.
pub mod traits;
/// Endpoint and timer identifiers.
pub mod types;

pub use traits::{Process, Scheduler, SchedulerError, Transport, TransportError};
pub use types::{PeerEndpoint, PeerEndpointParseError, TimerToken};
