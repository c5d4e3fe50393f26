use std::time::Duration;

use rand::Rng;

const JITTER_MS: u64 = 250;

/// Exponential upload backoff: the first failure waits the base delay,
/// doubling per consecutive failure up to the cap, with a small random
/// jitter so a fleet of agents does not retry in lockstep.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            consecutive_failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Records one more failure and returns how long to wait before the next
    /// attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let jitter =
            Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_MS));
        delay_for_failures(self.base, self.cap, self.consecutive_failures) + jitter
    }

    /// The first successful flush resets the counter.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

fn delay_for_failures(base: Duration, cap: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    // Exponent clamp keeps the multiplication from overflowing long before
    // the cap applies.
    let exponent = (failures - 1).min(20);
    base.saturating_mul(1 << exponent).min(cap)
}
