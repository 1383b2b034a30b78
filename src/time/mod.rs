//! Scheduling and delays.
//!
//! The crate never owns an event loop. It only needs a way to run a task
//! after a delay, expressed by the [`Scheduler`] trait and installed per
//! thread with [`install`]. [`EventLoop`] is a ready-made scheduler over a
//! virtual or wall clock.

mod clock;
mod event_loop;
mod timer;

pub use clock::{Time, TimeSource, VirtualClock, WallClock};
pub use event_loop::EventLoop;
pub use timer::TimerQueue;

use std::cell::RefCell;
use std::fmt;
use std::panic::Location;
use std::rc::Rc;
use std::time::Duration;

use crate::deferred::{Deferred, Eventual};
use crate::error::{Fault, raise};
use crate::frame::Frame;
use crate::tracing_compat::debug;

/// A unit of work run by a scheduler.
pub type Task = Box<dyn FnOnce()>;

/// Runs tasks after a delay.
///
/// Each task must run exactly once, no earlier than `delay` after it was
/// scheduled, and never re-entrantly from within `schedule`.
pub trait Scheduler {
    /// Schedules `task` to run after `delay`.
    fn schedule(&self, delay: Duration, task: Task);
}

thread_local! {
    static SCHEDULER: RefCell<Option<Rc<dyn Scheduler>>> = const { RefCell::new(None) };
}

/// Restores the previously installed scheduler when dropped.
///
/// Guards must be dropped in the reverse order of installation.
#[must_use = "the scheduler is uninstalled when the guard is dropped"]
pub struct SchedulerGuard {
    previous: Option<Rc<dyn Scheduler>>,
}

impl Drop for SchedulerGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = SCHEDULER.try_with(|slot| slot.replace(previous));
    }
}

impl fmt::Debug for SchedulerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerGuard")
            .field("restores_previous", &self.previous.is_some())
            .finish()
    }
}

/// Installs `scheduler` as the thread's scheduler.
pub fn install(scheduler: Rc<dyn Scheduler>) -> SchedulerGuard {
    let previous = SCHEDULER.with(|slot| slot.replace(Some(scheduler)));
    debug!(replaced = previous.is_some(), "scheduler installed");
    SchedulerGuard { previous }
}

/// Returns the thread's scheduler, if one is installed.
#[must_use]
pub fn current() -> Option<Rc<dyn Scheduler>> {
    SCHEDULER.with(|slot| slot.borrow().clone())
}

/// Returns `value` after `ms` milliseconds.
///
/// A negative delay returns `value` synchronously. Otherwise the value is
/// delivered through a deferred value owned by a fresh `delay` frame.
///
/// # Panics
///
/// Raises [`Fault::NoScheduler`] if no scheduler is installed on the thread.
#[track_caller]
pub fn delay<T: 'static>(ms: i64, value: T) -> Eventual<T> {
    if ms < 0 {
        return Eventual::Now(value);
    }
    let Some(scheduler) = current() else {
        raise(Fault::NoScheduler);
    };
    let frame = Frame::current().child("delay", Location::caller());
    let delayed = Deferred::new_in(frame);
    let target = delayed.clone();
    scheduler.schedule(
        Duration::from_millis(ms.unsigned_abs()),
        Box::new(move || target.resolve(value)),
    );
    Eventual::Later(delayed)
}
