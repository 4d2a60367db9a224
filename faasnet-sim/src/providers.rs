use std::time::Duration;

use faasnet_core::{
    PeerEndpoint, Scheduler, SchedulerError, TimerToken, Transport, TransportError,
};

use crate::{events::Event, world::WeakSimWorld};

/// [`Transport`] sending through the simulated network.
#[derive(Debug, Clone)]
pub struct SimTransport {
    endpoint: PeerEndpoint,
    sim: WeakSimWorld,
}

impl SimTransport {
    pub(crate) fn new(endpoint: PeerEndpoint, sim: WeakSimWorld) -> Self {
        Self { endpoint, sim }
    }
}

impl Transport for SimTransport {
    fn local_endpoint(&self) -> PeerEndpoint {
        self.endpoint
    }

    fn send(&self, to: &PeerEndpoint, frame: Vec<u8>) -> Result<(), TransportError> {
        let sim = self.sim.upgrade().map_err(|_| TransportError::Shutdown)?;
        let max = sim.with_network_config(|config| config.max_datagram_size);
        if frame.len() > max {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max,
            });
        }
        sim.send_datagram(self.endpoint, *to, frame);
        Ok(())
    }
}

/// [`Scheduler`] delivering timers through the simulation event queue.
#[derive(Debug, Clone)]
pub struct SimScheduler {
    owner: PeerEndpoint,
    sim: WeakSimWorld,
}

impl SimScheduler {
    pub(crate) fn new(owner: PeerEndpoint, sim: WeakSimWorld) -> Self {
        Self { owner, sim }
    }
}

impl Scheduler for SimScheduler {
    fn now(&self) -> Duration {
        self.sim.current_time().unwrap_or_default()
    }

    fn schedule_after(&self, delay: Duration, token: TimerToken) -> Result<(), SchedulerError> {
        self.sim
            .schedule_event(
                Event::Timer {
                    owner: self.owner,
                    token,
                },
                delay,
            )
            .map_err(|_| SchedulerError::Shutdown)
    }
}
