use core::ops::Add;
use core::time::Duration;
use std::cell::Cell;

/// A millisecond timestamp that wraps around after ~49 days, just like the
/// `millis()` counter of a microcontroller. Only differences between two
/// instants are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instant(u32);

impl Instant {
    #[must_use]
    pub const fn from_millis(millis: u32) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(self) -> u32 {
        self.0
    }

    /// Time from `earlier` until `self`. Correct across a single wrap of the
    /// counter.
    #[must_use]
    pub fn duration_since(self, earlier: Instant) -> Duration {
        Duration::from_millis(u64::from(self.0.wrapping_sub(earlier.0)))
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.wrapping_add(millis_u32(rhs)))
    }
}

pub(crate) fn millis_u32(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Source of time for the sensor lifecycle.
///
/// Waiting goes through the clock too so that tests and simulations can run
/// a complete logging cycle without sleeping.
pub trait Clock {
    fn now(&self) -> Instant;
    fn wait(&self, period: Duration);

    /// Returns immediately if `deadline` already passed. A deadline more
    /// than half the counter range ahead is treated as in the past.
    fn wait_until(&self, deadline: Instant) {
        let ahead = deadline.0.wrapping_sub(self.now().0);
        if ahead != 0 && ahead < u32::MAX / 2 {
            self.wait(Duration::from_millis(u64::from(ahead)));
        }
    }
}

/// Clock backed by the monotonic system clock, waiting sleeps the thread.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: std::time::Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[allow(clippy::cast_possible_truncation)] // wrapping is the point
    fn now(&self) -> Instant {
        Instant(self.start.elapsed().as_millis() as u32)
    }

    fn wait(&self, period: Duration) {
        std::thread::sleep(period);
    }
}

/// A clock that only moves when told to, or when something waits on it.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u32>,
}

impl ManualClock {
    #[must_use]
    pub fn starting_at(millis: u32) -> Self {
        Self {
            now: Cell::new(millis),
        }
    }

    pub fn advance(&self, period: Duration) {
        self.now.set(self.now.get().wrapping_add(millis_u32(period)));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant(self.now.get())
    }

    fn wait(&self, period: Duration) {
        self.advance(period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_survives_wrap() {
        let before = Instant::from_millis(u32::MAX - 9);
        let after = before + Duration::from_millis(25);
        assert_eq!(after.as_millis(), 15);
        assert_eq!(after.duration_since(before), Duration::from_millis(25));
    }

    #[test]
    fn manual_clock_moves_on_wait() {
        let clock = ManualClock::starting_at(100);
        clock.wait(Duration::from_millis(50));
        assert_eq!(clock.now(), Instant::from_millis(150));
    }

    #[test]
    fn wait_until_past_deadline_is_a_noop() {
        let clock = ManualClock::starting_at(1_000);
        clock.wait_until(Instant::from_millis(900));
        assert_eq!(clock.now().as_millis(), 1_000);
        clock.wait_until(Instant::from_millis(1_200));
        assert_eq!(clock.now().as_millis(), 1_200);
    }
}
