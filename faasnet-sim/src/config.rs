use std::time::Duration;

use crate::rng::{sim_random_range, sim_random_range_or_default};

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Base latency plus uniformly distributed jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyRange {
    /// Base latency duration
    pub base: Duration,
    /// Maximum additional jitter duration (0 to this value)
    pub jitter: Duration,
}

impl LatencyRange {
    /// Create a new latency range
    pub fn new(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }

    /// Create a fixed latency with no jitter
    pub fn fixed(duration: Duration) -> Self {
        Self {
            base: duration,
            jitter: Duration::ZERO,
        }
    }

    /// Draw a latency from the thread-local simulation RNG.
    ///
    /// ```rust
    /// use faasnet_sim::{LatencyRange, set_sim_seed};
    /// use std::time::Duration;
    ///
    /// set_sim_seed(42);
    /// let range = LatencyRange::new(Duration::from_millis(10), Duration::from_millis(5));
    /// let latency = range.sample();
    /// assert!(latency >= Duration::from_millis(10));
    /// assert!(latency <= Duration::from_millis(15));
    /// ```
    pub fn sample(&self) -> Duration {
        if self.jitter.is_zero() {
            self.base
        } else {
            let jitter_nanos = sim_random_range(0..(self.jitter.as_nanos() as u64 + 1));
            self.base + Duration::from_nanos(jitter_nanos)
        }
    }
}

impl Default for LatencyRange {
    fn default() -> Self {
        Self::new(Duration::from_millis(1), Duration::from_millis(4))
    }
}

/// Configuration for the simulated datagram network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfiguration {
    /// One-way delivery latency.
    pub latency: LatencyRange,
    /// Probability that a datagram is silently lost (0.0 - 1.0).
    pub drop_probability: f64,
    /// Probability that a delivered datagram has one bit flipped (0.0 - 1.0).
    pub corruption_probability: f64,
    /// Frames above this size are refused at send time.
    pub max_datagram_size: usize,
}

impl Default for NetworkConfiguration {
    fn default() -> Self {
        Self {
            latency: LatencyRange::default(),
            drop_probability: 0.0,
            corruption_probability: 0.0,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl NetworkConfiguration {
    /// Minimal fixed latency and no faults, for fast deterministic tests.
    pub fn fast_local() -> Self {
        Self {
            latency: LatencyRange::fixed(Duration::from_micros(10)),
            ..Self::default()
        }
    }

    /// Fixed one-way delay and no faults, like a dedicated point-to-point link.
    pub fn point_to_point(delay: Duration) -> Self {
        Self {
            latency: LatencyRange::fixed(delay),
            ..Self::default()
        }
    }

    /// Wide-area latencies, still without faults.
    pub fn wan_simulation() -> Self {
        Self {
            latency: LatencyRange::new(Duration::from_millis(20), Duration::from_millis(80)),
            ..Self::default()
        }
    }

    /// Default latencies with the given loss and corruption rates.
    pub fn lossy(drop_probability: f64, corruption_probability: f64) -> Self {
        Self {
            drop_probability,
            corruption_probability,
            ..Self::default()
        }
    }

    /// Draw latency and fault rates from the thread-local simulation RNG.
    ///
    /// Seed the RNG first; the same seed always produces the same network.
    pub fn random_network() -> Self {
        let base_us = sim_random_range(100u64..20_000);
        let jitter_us = sim_random_range_or_default(0u64..10_000);
        Self {
            latency: LatencyRange::new(
                Duration::from_micros(base_us),
                Duration::from_micros(jitter_us),
            ),
            drop_probability: sim_random_range_or_default(0.0..0.05),
            corruption_probability: sim_random_range_or_default(0.0..0.01),
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::set_sim_seed;

    #[test]
    fn fixed_latency_has_no_jitter() {
        let range = LatencyRange::fixed(Duration::from_millis(40));
        for _ in 0..10 {
            assert_eq!(range.sample(), Duration::from_millis(40));
        }
    }

    #[test]
    fn random_network_is_seed_deterministic() {
        set_sim_seed(77);
        let a = NetworkConfiguration::random_network();
        set_sim_seed(77);
        let b = NetworkConfiguration::random_network();
        assert_eq!(a, b);
        assert!(a.drop_probability < 0.05);
    }
}
