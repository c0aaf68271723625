use std::time::Instant;

/// Time source for the state machines.
///
/// `now` drives flush scheduling; `unix_now` is compared against the server's
/// clock to derive the skew.
pub trait Clock {
    fn now(&self) -> Instant;
    fn unix_now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}
