//! See [`ConnectionRng`].

use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Source of randomness for connection ids and the debug packet-loss/latency
/// simulators (`spec.md` §7 "Debug/Diagnostics").
///
/// Wrapped behind a trait-free struct rather than calling `rand::thread_rng`
/// directly at each use site, so tests can swap in a seeded instance via
/// [`ConnectionRng::seeded`] and get deterministic drop/delay decisions.
#[derive(Debug)]
pub struct ConnectionRng {
    inner: StdRng,
}

impl Default for ConnectionRng {
    fn default() -> Self {
        Self {
            inner: StdRng::from_entropy(),
        }
    }
}

impl ConnectionRng {
    /// Creates a deterministic generator from a fixed seed, for tests.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
        }
    }

    /// Generates a fresh connection id for a `ConnectRequest`.
    pub fn connection_id(&mut self) -> u64 {
        self.inner.gen()
    }

    /// Rolls whether a packet should be dropped, given
    /// `simulation_packet_loss_chance` in `[0.0, 1.0]`.
    pub fn roll_drop(&mut self, chance: f32) -> bool {
        chance > 0.0 && self.inner.gen::<f32>() < chance
    }

    /// Picks a simulated processing delay uniformly between `min` and `max`.
    /// Returns `min` unmodified if `max <= min`.
    pub fn roll_latency(&mut self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let span = max - min;
        let jitter_nanos = self.inner.gen_range(0..=span.as_nanos());
        min + Duration::from_nanos(u64::try_from(jitter_nanos).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rng_is_deterministic() {
        let mut a = ConnectionRng::seeded(42);
        let mut b = ConnectionRng::seeded(42);
        assert_eq!(a.connection_id(), b.connection_id());
    }

    #[test]
    fn zero_chance_never_drops() {
        let mut rng = ConnectionRng::seeded(1);
        for _ in 0..100 {
            assert!(!rng.roll_drop(0.0));
        }
    }

    #[test]
    fn full_chance_always_drops() {
        let mut rng = ConnectionRng::seeded(1);
        for _ in 0..100 {
            assert!(rng.roll_drop(1.0));
        }
    }

    #[test]
    fn latency_within_bounds() {
        let mut rng = ConnectionRng::seeded(7);
        let min = Duration::from_millis(10);
        let max = Duration::from_millis(50);
        for _ in 0..100 {
            let d = rng.roll_latency(min, max);
            assert!(d >= min && d <= max);
        }
    }
}
