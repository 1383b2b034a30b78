//! Time sources for the event loop.

use std::cell::Cell;
use std::fmt;
use std::ops::Add;
use std::time::{Duration, Instant};

fn duration_to_nanos_saturating(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// An instant on an event loop's clock, in nanoseconds since its epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The epoch.
    pub const ZERO: Self = Self(0);

    /// Creates a time from nanoseconds since the epoch.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a time from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Returns nanoseconds since the epoch.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns milliseconds since the epoch, truncated.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Returns the time elapsed since `earlier`, zero if `earlier` is later.
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(duration_to_nanos_saturating(rhs)))
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

/// A clock the event loop reads and waits on.
pub trait TimeSource {
    /// Returns the current time.
    fn now(&self) -> Time;

    /// Returns once `deadline` has been reached.
    fn wait_until(&self, deadline: Time);
}

/// A clock that only moves when the event loop waits on it.
///
/// Waiting jumps straight to the deadline, so timer-driven code runs
/// instantly and deterministically.
///
/// ```
/// use tasync::time::{Time, TimeSource, VirtualClock};
///
/// let clock = VirtualClock::new();
/// clock.wait_until(Time::from_millis(250));
/// assert_eq!(clock.now().as_millis(), 250);
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Cell<u64>,
}

impl VirtualClock {
    /// Creates a clock at the epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.set((self.now() + by).as_nanos());
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.get())
    }

    fn wait_until(&self, deadline: Time) {
        if deadline.as_nanos() > self.now.get() {
            self.now.set(deadline.as_nanos());
        }
    }
}

/// The monotonic system clock. Waiting sleeps the thread.
#[derive(Debug)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        Time::from_nanos(duration_to_nanos_saturating(self.epoch.elapsed()))
    }

    fn wait_until(&self, deadline: Time) {
        let remaining = deadline.duration_since(self.now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}
