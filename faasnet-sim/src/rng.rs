//! Thread-local random number generation for simulation.
//!
//! Randomness lives in thread-local storage so latency sampling and fault
//! injection do not need an RNG threaded through every call. Each thread has
//! its own state, which keeps parallel test execution deterministic.

use rand::SeedableRng;
use rand::{
    Rng,
    distr::{Distribution, StandardUniform, uniform::SampleUniform},
};
use rand_chacha::ChaCha8Rng;
use std::cell::{Cell, RefCell};
use std::ops::Range;

thread_local! {
    static SIM_RNG: RefCell<ChaCha8Rng> = RefCell::new(ChaCha8Rng::seed_from_u64(0));

    /// Last seed passed to [`set_sim_seed`], kept for failure reports.
    static CURRENT_SEED: Cell<u64> = const { Cell::new(0) };
}

/// Generate a random value using the thread-local simulation RNG.
///
/// # Example
///
/// ```rust
/// use faasnet_sim::rng::{set_sim_seed, sim_random};
///
/// set_sim_seed(42);
/// let value1: f64 = sim_random();
/// set_sim_seed(42);
/// let value2: f64 = sim_random();
/// assert_eq!(value1, value2);
/// ```
pub fn sim_random<T>() -> T
where
    StandardUniform: Distribution<T>,
{
    SIM_RNG.with(|rng| rng.borrow_mut().sample(StandardUniform))
}

/// Generate a random value within `range` (exclusive upper bound).
///
/// Panics on an empty range; use [`sim_random_range_or_default`] when the
/// range may be empty.
pub fn sim_random_range<T>(range: Range<T>) -> T
where
    T: SampleUniform + PartialOrd,
{
    SIM_RNG.with(|rng| rng.borrow_mut().random_range(range))
}

/// Like [`sim_random_range`], but returns `range.start` for an empty range.
pub fn sim_random_range_or_default<T>(range: Range<T>) -> T
where
    T: SampleUniform + PartialOrd + Clone,
{
    if range.start >= range.end {
        range.start
    } else {
        sim_random_range(range)
    }
}

/// Returns `true` with the given probability.
///
/// Probabilities outside `0.0..=1.0` are clamped, so a misconfigured
/// network never panics the simulation.
pub fn sim_random_bool(probability: f64) -> bool {
    if probability <= 0.0 {
        return false;
    }
    if probability >= 1.0 {
        return true;
    }
    sim_random::<f64>() < probability
}

/// Seed the thread-local simulation RNG.
pub fn set_sim_seed(seed: u64) {
    SIM_RNG.with(|rng| {
        *rng.borrow_mut() = ChaCha8Rng::seed_from_u64(seed);
    });
    CURRENT_SEED.with(|s| s.set(seed));
}

/// Returns the seed most recently passed to [`set_sim_seed`].
pub fn get_current_sim_seed() -> u64 {
    CURRENT_SEED.with(|s| s.get())
}

/// Reset the thread-local RNG to its initial state (seed 0).
pub fn reset_sim_rng() {
    set_sim_seed(0);
}
