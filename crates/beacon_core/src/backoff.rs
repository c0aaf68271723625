use std::cmp::Ordering;
use std::time::Duration;

/// Reconnect delay growth: `min(max, initial * factor^n)` for the n-th
/// consecutive failure, counting from zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            factor: 1.5,
            max: Duration::from_millis(7500),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let nanos = (self.initial.as_nanos() as f64 * self.factor.powi(exponent)).round();
        // Overflow to infinity and NaN both fall through to the cap.
        match nanos.partial_cmp(&(self.max.as_nanos() as f64)) {
            Some(Ordering::Less) => Duration::from_nanos(nanos as u64),
            _ => self.max,
        }
    }
}

/// Per-channel backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Delay to wait before the next reopen; counts one more failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// The delay [`Backoff::next_delay`] would return, without consuming it.
    pub fn peek(&self) -> Duration {
        self.policy.delay_for(self.failures)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
