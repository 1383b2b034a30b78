//! A single-threaded timer loop.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use super::clock::{Time, TimeSource, VirtualClock, WallClock};
use super::timer::TimerQueue;
use super::{Scheduler, SchedulerGuard, Task, install};
use crate::tracing_compat::{debug, trace};

/// Runs scheduled tasks in deadline order on one thread.
///
/// The loop is a [`Scheduler`]: install it with [`EventLoop::install`] and
/// every [`delay`](super::delay) on the thread lands in it.
///
/// ```
/// use std::rc::Rc;
/// use tasync::time::{EventLoop, delay};
///
/// let event_loop = Rc::new(EventLoop::virtual_time());
/// let _guard = event_loop.install();
/// let later = delay(100, "done").into_deferred();
/// assert_eq!(event_loop.run(), 1);
/// assert_eq!(later.value(), Some("done"));
/// assert_eq!(event_loop.now().as_millis(), 100);
/// ```
pub struct EventLoop<C = VirtualClock> {
    clock: C,
    timers: RefCell<TimerQueue>,
}

impl EventLoop<VirtualClock> {
    /// Creates a loop over a virtual clock.
    #[must_use]
    pub fn virtual_time() -> Self {
        Self::with_clock(VirtualClock::new())
    }
}

impl EventLoop<WallClock> {
    /// Creates a loop over the system clock.
    #[must_use]
    pub fn wall_clock() -> Self {
        Self::with_clock(WallClock::new())
    }
}

impl<C: TimeSource> EventLoop<C> {
    /// Creates a loop over `clock`.
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            timers: RefCell::new(TimerQueue::new()),
        }
    }

    /// Returns the clock's current time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Returns the number of scheduled tasks not yet run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Runs tasks until none is left, waiting on the clock between deadlines.
    /// Returns the number of tasks run.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        while let Some(deadline) = self.next_deadline() {
            self.clock.wait_until(deadline);
            ran += self.run_due();
        }
        debug!(ran, now = ?self.now(), "event loop drained");
        ran
    }

    /// Runs every task due at or before `until`, then waits until `until`.
    /// Returns the number of tasks run.
    pub fn run_until(&self, until: Time) -> usize {
        let mut ran = 0;
        while let Some(deadline) = self.next_deadline().filter(|d| *d <= until) {
            self.clock.wait_until(deadline);
            ran += self.run_due();
        }
        self.clock.wait_until(until);
        ran
    }

    /// Runs every task due within `by` from now.
    pub fn advance(&self, by: Duration) -> usize {
        self.run_until(self.now() + by)
    }

    fn next_deadline(&self) -> Option<Time> {
        self.timers.borrow().next_deadline()
    }

    fn run_due(&self) -> usize {
        let now = self.clock.now();
        let mut ran = 0;
        // Popped one at a time: a task may schedule more work that is already due.
        loop {
            let due = self.timers.borrow_mut().pop_due(now);
            let Some(task) = due else { break };
            task();
            ran += 1;
        }
        trace!(ran, now = ?now, "ran due timer tasks");
        ran
    }
}

impl<C: TimeSource + 'static> EventLoop<C> {
    /// Makes this loop the thread's scheduler until the guard is dropped.
    #[must_use]
    pub fn install(self: &Rc<Self>) -> SchedulerGuard {
        install(Rc::clone(self) as Rc<dyn Scheduler>)
    }
}

impl<C: TimeSource> Scheduler for EventLoop<C> {
    fn schedule(&self, delay: Duration, task: Task) {
        let deadline = self.clock.now() + delay;
        let seq = self.timers.borrow_mut().push(deadline, task);
        trace!(seq, deadline = ?deadline, "timer scheduled");
    }
}

impl<C: fmt::Debug> fmt::Debug for EventLoop<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("clock", &self.clock)
            .field("timers", &*self.timers.borrow())
            .finish()
    }
}
