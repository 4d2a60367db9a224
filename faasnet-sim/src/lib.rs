//! # faasnet simulation
//!
//! A deterministic discrete-event simulator for datagram protocols.
//!
//! - Logical time advanced event by event, never by the wall clock
//! - A priority queue ordered by (time, sequence) for reproducible interleavings
//! - A seeded thread-local RNG driving latency, loss and corruption
//! - Handle-based access ([`SimTransport`], [`SimScheduler`]) so processes can
//!   send and arm timers from inside their own callbacks
//!
//! ## Example Usage
//!
//! ```rust
//! use faasnet_core::{PeerEndpoint, Process, TimerToken};
//! use faasnet_sim::SimWorld;
//! use std::{cell::RefCell, rc::Rc, time::Duration};
//!
//! struct Sleeper(u32);
//!
//! impl Process for Sleeper {
//!     fn on_datagram(&mut self, _from: PeerEndpoint, _frame: &[u8]) {}
//!     fn on_timer(&mut self, _token: TimerToken) {
//!         self.0 += 1;
//!     }
//! }
//!
//! let mut sim = SimWorld::new_with_seed(7);
//! let endpoint = PeerEndpoint::parse("10.0.0.1:3000").expect("endpoint");
//! let sleeper = Rc::new(RefCell::new(Sleeper(0)));
//! sim.register_process(endpoint, sleeper.clone()).expect("register");
//!
//! use faasnet_core::Scheduler;
//! sim.scheduler(endpoint)
//!     .schedule_after(Duration::from_millis(100), TimerToken(1))
//!     .expect("schedule");
//! sim.run_until_empty();
//!
//! assert_eq!(sleeper.borrow().0, 1);
//! assert_eq!(sim.current_time(), Duration::from_millis(100));
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Network simulation parameters.
pub mod config;
/// Error types for simulation operations.
pub mod error;
/// Event scheduling primitives.
pub mod events;
/// Transport and scheduler handles bound to a simulated endpoint.
pub mod providers;
/// Thread-local random number generation for simulation.
pub mod rng;
/// Core simulation world.
pub mod world;

pub use config::{LatencyRange, NetworkConfiguration};
pub use error::{SimulationError, SimulationResult};
pub use events::{Event, EventQueue, ScheduledEvent};
pub use providers::{SimScheduler, SimTransport};
pub use rng::{
    get_current_sim_seed, reset_sim_rng, set_sim_seed, sim_random, sim_random_bool,
    sim_random_range, sim_random_range_or_default,
};
pub use world::{DatagramFate, DatagramRecord, SimWorld, SimulationMetrics, WeakSimWorld};
