use std::{cell::RefCell, rc::Rc, time::Duration};

use faasnet_core::{PeerEndpoint, Process, TimerToken, Transport};
use faasnet_sim::{NetworkConfiguration, SimTransport, SimWorld};

/// Echoes every datagram back until `remaining` reaches zero.
pub struct Ponger {
    pub transport: SimTransport,
    pub remaining: u32,
    pub received: Vec<(Duration, Vec<u8>)>,
    pub clock: Rc<dyn Fn() -> Duration>,
}

impl Process for Ponger {
    fn on_datagram(&mut self, from: PeerEndpoint, frame: &[u8]) {
        self.received.push(((self.clock)(), frame.to_vec()));
        if self.remaining == 0 {
            return;
        }
        self.remaining -= 1;
        let _ = self.transport.send(&from, frame.to_vec());
    }

    fn on_timer(&mut self, _token: TimerToken) {}
}

pub fn run_ping_pong(config: NetworkConfiguration, seed: u64, rounds: u32) -> (SimWorld, Rc<RefCell<Ponger>>, Rc<RefCell<Ponger>>) {
    let mut sim = SimWorld::new_with_network_config_and_seed(config, seed);
    let a = PeerEndpoint::parse("10.1.1.1:3000").expect("endpoint");
    let b = PeerEndpoint::parse("10.1.1.2:3000").expect("endpoint");

    let weak = sim.downgrade();
    let clock: Rc<dyn Fn() -> Duration> =
        Rc::new(move || weak.current_time().unwrap_or_default());

    let pinger = Rc::new(RefCell::new(Ponger {
        transport: sim.transport(a),
        remaining: rounds,
        received: Vec::new(),
        clock: clock.clone(),
    }));
    let ponger = Rc::new(RefCell::new(Ponger {
        transport: sim.transport(b),
        remaining: rounds,
        received: Vec::new(),
        clock,
    }));
    sim.register_process(a, pinger.clone()).expect("register a");
    sim.register_process(b, ponger.clone()).expect("register b");

    sim.transport(a).send(&b, b"ping".to_vec()).expect("send");
    sim.run_until_empty();
    (sim, pinger, ponger)
}

#[test]
fn ping_pong_over_fixed_link() {
    let (sim, pinger, ponger) =
        run_ping_pong(NetworkConfiguration::point_to_point(Duration::from_millis(2)), 1, 3);

    // ponger sees ping at 2ms, 6ms, 10ms, 14ms; pinger replies stop after 3
    assert_eq!(ponger.borrow().received.len(), 4);
    assert_eq!(pinger.borrow().received.len(), 3);
    assert_eq!(sim.current_time(), Duration::from_millis(14));
    assert_eq!(sim.metrics().datagrams_delivered, 7);
}
