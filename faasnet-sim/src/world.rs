use std::{
    cell::RefCell,
    collections::HashMap,
    net::IpAddr,
    rc::{Rc, Weak},
    time::Duration,
};

use faasnet_core::{PeerEndpoint, Process};
use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::{
    config::NetworkConfiguration,
    error::{SimulationError, SimulationResult},
    events::{Event, EventQueue, ScheduledEvent},
    providers::{SimScheduler, SimTransport},
    rng::{reset_sim_rng, set_sim_seed, sim_random_bool, sim_random_range},
};

/// What the network decided to do with a datagram at send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatagramFate {
    /// Scheduled for delivery.
    InFlight {
        /// Simulation time at which it reaches the receiver.
        arrival: Duration,
    },
    /// Lost to the configured drop probability.
    Dropped,
    /// Blocked by an active partition.
    Partitioned,
}

/// One datagram as seen by the network, recorded when tracing is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatagramRecord {
    /// Simulation time of the send.
    pub sent_at: Duration,
    /// Sender.
    pub from: PeerEndpoint,
    /// Destination.
    pub to: PeerEndpoint,
    /// Frame bytes as sent, before any corruption.
    pub frame: Vec<u8>,
    /// Whether a bit was flipped in flight.
    pub corrupted: bool,
    /// Delivery decision.
    pub fate: DatagramFate,
}

/// Counters collected while the simulation runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationMetrics {
    /// Simulated logical time elapsed.
    pub simulated_time: Duration,
    /// Number of events processed.
    pub events_processed: u64,
    /// Datagrams handed to the network.
    pub datagrams_sent: u64,
    /// Datagrams handed to a receiving process.
    pub datagrams_delivered: u64,
    /// Datagrams lost to the drop probability.
    pub datagrams_dropped: u64,
    /// Datagrams blocked by a partition.
    pub datagrams_partitioned: u64,
    /// Datagrams with a flipped bit.
    pub datagrams_corrupted: u64,
    /// Datagrams that arrived at an endpoint with no process.
    pub datagrams_undeliverable: u64,
    /// Timers delivered to their owner.
    pub timers_fired: u64,
}

#[derive(Debug)]
struct SimInner {
    current_time: Duration,
    event_queue: EventQueue,
    next_sequence: u64,
    network: NetworkConfiguration,
    // (from, to) -> partition end time
    partitions: HashMap<(IpAddr, IpAddr), Duration>,
    metrics: SimulationMetrics,
    trace: Option<Vec<DatagramRecord>>,
}

impl SimInner {
    fn new(network: NetworkConfiguration) -> Self {
        Self {
            current_time: Duration::ZERO,
            event_queue: EventQueue::new(),
            next_sequence: 0,
            network,
            partitions: HashMap::new(),
            metrics: SimulationMetrics::default(),
            trace: None,
        }
    }

    fn schedule_at(&mut self, event: Event, time: Duration) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.event_queue
            .schedule(ScheduledEvent::new(time, event, sequence));
    }

    fn is_partitioned(&self, from: IpAddr, to: IpAddr) -> bool {
        self.partitions
            .get(&(from, to))
            .is_some_and(|until| self.current_time < *until)
    }
}

type ProcessTable = HashMap<PeerEndpoint, Rc<RefCell<dyn Process>>>;

/// The central simulation coordinator.
///
/// `SimWorld` owns time, the event queue, the simulated network and the table
/// of processes bound to endpoints. Processes reach back into the world only
/// through [`SimTransport`] and [`SimScheduler`] handles, which hold weak
/// references, and are dispatched with no internal borrow held so they can
/// send and arm timers from inside their callbacks.
pub struct SimWorld {
    inner: Rc<RefCell<SimInner>>,
    processes: Rc<RefCell<ProcessTable>>,
}

impl std::fmt::Debug for SimWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimWorld")
            .field("inner", &self.inner)
            .field("processes", &self.processes.borrow().len())
            .finish()
    }
}

impl SimWorld {
    /// Creates a new simulation world with default network configuration and seed 0.
    pub fn new() -> Self {
        Self::new_with_network_config_and_seed(NetworkConfiguration::default(), 0)
    }

    /// Creates a new simulation world with a specific seed.
    ///
    /// The thread-local RNG is reset first, so consecutive simulations on the
    /// same thread do not leak state into each other.
    pub fn new_with_seed(seed: u64) -> Self {
        Self::new_with_network_config_and_seed(NetworkConfiguration::default(), seed)
    }

    /// Creates a new simulation world with custom network configuration and seed 0.
    pub fn new_with_network_config(network_config: NetworkConfiguration) -> Self {
        Self::new_with_network_config_and_seed(network_config, 0)
    }

    /// Creates a new simulation world with both custom network configuration and seed.
    pub fn new_with_network_config_and_seed(
        network_config: NetworkConfiguration,
        seed: u64,
    ) -> Self {
        reset_sim_rng();
        set_sim_seed(seed);

        Self {
            inner: Rc::new(RefCell::new(SimInner::new(network_config))),
            processes: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Bind a process to an endpoint so it receives datagrams and timers.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::DuplicateEndpoint`] if the endpoint is taken.
    pub fn register_process<P>(
        &self,
        endpoint: PeerEndpoint,
        process: Rc<RefCell<P>>,
    ) -> SimulationResult<()>
    where
        P: Process + 'static,
    {
        let mut processes = self.processes.borrow_mut();
        if processes.contains_key(&endpoint) {
            return Err(SimulationError::DuplicateEndpoint(endpoint));
        }
        let process: Rc<RefCell<dyn Process>> = process;
        processes.insert(endpoint, process);
        debug!(%endpoint, "process registered");
        Ok(())
    }

    /// Unbind the process at `endpoint`, simulating a crash.
    ///
    /// Datagrams and timers addressed to it are discarded from now on.
    /// Returns `true` if a process was bound.
    pub fn remove_process(&self, endpoint: &PeerEndpoint) -> bool {
        let removed = self.processes.borrow_mut().remove(endpoint).is_some();
        if removed {
            debug!(%endpoint, "process removed");
        }
        removed
    }

    /// Transport handle sending from `endpoint`.
    pub fn transport(&self, endpoint: PeerEndpoint) -> SimTransport {
        SimTransport::new(endpoint, self.downgrade())
    }

    /// Scheduler handle delivering timers to the process at `endpoint`.
    pub fn scheduler(&self, endpoint: PeerEndpoint) -> SimScheduler {
        SimScheduler::new(endpoint, self.downgrade())
    }

    /// Processes the next scheduled event and advances time.
    ///
    /// Returns `true` if more events are available for processing,
    /// `false` if this was the last event or if no events are available.
    #[instrument(skip(self))]
    pub fn step(&mut self) -> bool {
        let event = {
            let mut inner = self.inner.borrow_mut();
            let Some(scheduled) = inner.event_queue.pop_earliest() else {
                return false;
            };
            inner.current_time = scheduled.time();
            inner.metrics.simulated_time = inner.current_time;
            inner.metrics.events_processed += 1;
            scheduled.into_event()
        };

        self.dispatch(event);
        self.has_pending_events()
    }

    fn dispatch(&self, event: Event) {
        match event {
            Event::Datagram { from, to, frame } => {
                let Some(process) = self.process_at(&to) else {
                    self.inner.borrow_mut().metrics.datagrams_undeliverable += 1;
                    debug!(%from, %to, "datagram to unbound endpoint discarded");
                    return;
                };
                self.inner.borrow_mut().metrics.datagrams_delivered += 1;
                trace!(%from, %to, len = frame.len(), "deliver datagram");
                process.borrow_mut().on_datagram(from, &frame);
            }
            Event::Timer { owner, token } => {
                let Some(process) = self.process_at(&owner) else {
                    debug!(%owner, %token, "timer for unbound endpoint discarded");
                    return;
                };
                self.inner.borrow_mut().metrics.timers_fired += 1;
                process.borrow_mut().on_timer(token);
            }
        }
    }

    fn process_at(&self, endpoint: &PeerEndpoint) -> Option<Rc<RefCell<dyn Process>>> {
        self.processes.borrow().get(endpoint).cloned()
    }

    /// Processes all scheduled events until the queue is empty.
    ///
    /// Never returns if processes keep re-arming timers; bound the run with
    /// [`SimWorld::run_until`] in that case.
    #[instrument(skip(self))]
    pub fn run_until_empty(&mut self) {
        while self.step() {}
    }

    /// Processes every event scheduled at or before `deadline`, then moves
    /// the clock to `deadline`.
    #[instrument(skip(self))]
    pub fn run_until(&mut self, deadline: Duration) {
        loop {
            let next = self
                .inner
                .borrow()
                .event_queue
                .peek_earliest()
                .map(|e| e.time());
            match next {
                Some(time) if time <= deadline => {
                    self.step();
                }
                _ => break,
            }
        }

        let mut inner = self.inner.borrow_mut();
        if inner.current_time < deadline {
            inner.current_time = deadline;
            inner.metrics.simulated_time = deadline;
        }
    }

    /// Runs for `duration` of simulated time from now.
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = self.current_time() + duration;
        self.run_until(deadline);
    }

    /// Returns the current simulation time.
    pub fn current_time(&self) -> Duration {
        self.inner.borrow().current_time
    }

    /// Schedules an event to execute after the specified delay from the current time.
    pub fn schedule_event(&self, event: Event, delay: Duration) {
        let mut inner = self.inner.borrow_mut();
        let at = inner.current_time + delay;
        inner.schedule_at(event, at);
    }

    /// Schedules an event to execute at the specified absolute time.
    pub fn schedule_event_at(&self, event: Event, time: Duration) {
        self.inner.borrow_mut().schedule_at(event, time);
    }

    /// Put a datagram on the simulated network.
    ///
    /// Applies partitions, loss, corruption and latency in that order and
    /// returns what happened to it.
    pub fn send_datagram(
        &self,
        from: PeerEndpoint,
        to: PeerEndpoint,
        frame: Vec<u8>,
    ) -> DatagramFate {
        let mut inner = self.inner.borrow_mut();
        inner.metrics.datagrams_sent += 1;

        let original = inner.trace.as_ref().map(|_| frame.clone());
        let mut frame = frame;
        let mut corrupted = false;

        let fate = if inner.is_partitioned(from.ip, to.ip) {
            inner.metrics.datagrams_partitioned += 1;
            debug!(%from, %to, "datagram blocked by partition");
            DatagramFate::Partitioned
        } else if sim_random_bool(inner.network.drop_probability) {
            inner.metrics.datagrams_dropped += 1;
            debug!(%from, %to, "datagram dropped");
            DatagramFate::Dropped
        } else {
            if !frame.is_empty() && sim_random_bool(inner.network.corruption_probability) {
                let bit = sim_random_range(0..frame.len() * 8);
                frame[bit / 8] ^= 1 << (bit % 8);
                corrupted = true;
                inner.metrics.datagrams_corrupted += 1;
                debug!(%from, %to, bit, "datagram corrupted");
            }
            let arrival = inner.current_time + inner.network.latency.sample();
            inner.schedule_at(Event::Datagram { from, to, frame }, arrival);
            DatagramFate::InFlight { arrival }
        };

        let sent_at = inner.current_time;
        if let (Some(trace), Some(frame)) = (inner.trace.as_mut(), original) {
            trace.push(DatagramRecord {
                sent_at,
                from,
                to,
                frame,
                corrupted,
                fate,
            });
        }
        fate
    }

    /// Start recording every datagram handed to the network.
    pub fn enable_datagram_trace(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.trace.is_none() {
            inner.trace = Some(Vec::new());
        }
    }

    /// Datagrams recorded since [`SimWorld::enable_datagram_trace`].
    pub fn datagram_trace(&self) -> Vec<DatagramRecord> {
        self.inner.borrow().trace.clone().unwrap_or_default()
    }

    /// Block datagrams from `from` to `to` for `duration`. Directional.
    pub fn partition_pair(&self, from: IpAddr, to: IpAddr, duration: Duration) {
        let mut inner = self.inner.borrow_mut();
        let until = inner.current_time + duration;
        inner.partitions.insert((from, to), until);
        debug!(%from, %to, ?until, "partition installed");
    }

    /// Lift a partition installed with [`SimWorld::partition_pair`].
    pub fn restore_partition(&self, from: IpAddr, to: IpAddr) {
        self.inner.borrow_mut().partitions.remove(&(from, to));
    }

    /// Whether datagrams from `from` to `to` are currently blocked.
    pub fn is_partitioned(&self, from: IpAddr, to: IpAddr) -> bool {
        self.inner.borrow().is_partitioned(from, to)
    }

    /// Read the network configuration.
    pub fn with_network_config<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&NetworkConfiguration) -> R,
    {
        f(&self.inner.borrow().network)
    }

    /// Replace the network configuration; affects datagrams sent from now on.
    pub fn set_network_config(&self, network: NetworkConfiguration) {
        self.inner.borrow_mut().network = network;
    }

    /// Snapshot of the simulation counters.
    pub fn metrics(&self) -> SimulationMetrics {
        self.inner.borrow().metrics.clone()
    }

    /// Creates a weak reference to this simulation world.
    pub fn downgrade(&self) -> WeakSimWorld {
        WeakSimWorld {
            inner: Rc::downgrade(&self.inner),
            processes: Rc::downgrade(&self.processes),
        }
    }

    /// Returns `true` if there are events waiting to be processed.
    pub fn has_pending_events(&self) -> bool {
        !self.inner.borrow().event_queue.is_empty()
    }

    /// Returns the number of events waiting to be processed.
    pub fn pending_event_count(&self) -> usize {
        self.inner.borrow().event_queue.len()
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// A weak reference to a simulation world.
///
/// All operations fail with [`SimulationError::SimulationShutdown`] once the
/// world has been dropped.
#[derive(Debug, Clone)]
pub struct WeakSimWorld {
    inner: Weak<RefCell<SimInner>>,
    processes: Weak<RefCell<ProcessTable>>,
}

impl WeakSimWorld {
    /// Attempts to upgrade this weak reference to a strong reference.
    pub fn upgrade(&self) -> SimulationResult<SimWorld> {
        match (self.inner.upgrade(), self.processes.upgrade()) {
            (Some(inner), Some(processes)) => Ok(SimWorld { inner, processes }),
            _ => Err(SimulationError::SimulationShutdown),
        }
    }

    /// Returns the current simulation time.
    pub fn current_time(&self) -> SimulationResult<Duration> {
        Ok(self.upgrade()?.current_time())
    }

    /// Schedules an event to execute after the specified delay from the current time.
    pub fn schedule_event(&self, event: Event, delay: Duration) -> SimulationResult<()> {
        self.upgrade()?.schedule_event(event, delay);
        Ok(())
    }

    /// Put a datagram on the simulated network.
    pub fn send_datagram(
        &self,
        from: PeerEndpoint,
        to: PeerEndpoint,
        frame: Vec<u8>,
    ) -> SimulationResult<DatagramFate> {
        Ok(self.upgrade()?.send_datagram(from, to, frame))
    }

    /// Read the network configuration.
    pub fn with_network_config<F, R>(&self, f: F) -> SimulationResult<R>
    where
        F: FnOnce(&NetworkConfiguration) -> R,
    {
        Ok(self.upgrade()?.with_network_config(f))
    }
}
