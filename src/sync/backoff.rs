use std::time::Duration;

use rand::Rng;

/// Spread applied around the nominal delay, as a fraction of it.
pub const JITTER: f64 = 0.2;

/// Jittered exponential backoff for failed polls.
///
/// The nominal delay starts at `base`, doubles per consecutive failure and is capped at `max`;
/// the returned delay is drawn uniformly within `JITTER` of it.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Delay before the retry that follows the failure just observed.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let nominal = self.nominal(self.failures);
        self.failures = self.failures.saturating_add(1);
        nominal.mul_f64(rng.gen_range(1.0 - JITTER..=1.0 + JITTER))
    }

    fn nominal(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}
