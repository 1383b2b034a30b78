//! Bounding the number of in-flight calls.
//!
//! A [`Throttle`] wraps a deferred-returning function and admits at most
//! `limit` calls at a time. Calls over the limit wait in a FIFO queue and get a
//! pending deferred value right away. A slot is freed as soon as a call's
//! outcome settles (immediately for synchronous outcomes), and the oldest
//! queued call is dispatched into it.
//!
//! ```
//! use std::rc::Rc;
//! use tasync::{DeferredFn, Eventual, Throttle, ready};
//!
//! let f: DeferredFn<u32, u32> = Rc::new(|x: u32| ready(x + 1));
//! let limited = Throttle::new(f, 2);
//! assert!(matches!(limited.call(1), Ok(Eventual::Now(2))));
//! assert_eq!(limited.in_flight(), 0);
//! assert_eq!(limited.limit(), 2);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use crate::bridge::DeferredFn;
use crate::deferred::{Deferred, Eventual, Outcome};
use crate::error::{Error, Fault, raise, resume_if_fault};
use crate::invoke::settle_into;
use crate::tracing_compat::debug;

struct State<A, T> {
    running: usize,
    queue: VecDeque<(A, Deferred<T>)>,
}

struct Inner<A, T> {
    func: DeferredFn<A, T>,
    limit: usize,
    state: RefCell<State<A, T>>,
}

/// A deferred-returning function limited to `limit` concurrent calls.
pub struct Throttle<A, T> {
    inner: Rc<Inner<A, T>>,
}

impl<A, T> Clone for Throttle<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A: 'static, T: Clone + 'static> Throttle<A, T> {
    /// Wraps `func`, admitting at most `limit` concurrent calls.
    ///
    /// # Panics
    ///
    /// Raises [`Fault::ZeroLimit`] if `limit` is zero.
    #[track_caller]
    #[must_use]
    pub fn new(func: DeferredFn<A, T>, limit: usize) -> Self {
        if limit == 0 {
            raise(Fault::ZeroLimit);
        }
        Self {
            inner: Rc::new(Inner {
                func,
                limit,
                state: RefCell::new(State {
                    running: 0,
                    queue: VecDeque::new(),
                }),
            }),
        }
    }

    /// Calls the wrapped function now if a slot is free, otherwise queues the
    /// call and returns a pending value.
    ///
    /// # Errors
    ///
    /// Returns `Err` when an admitted call fails or panics synchronously.
    pub fn call(&self, args: A) -> Outcome<T> {
        let admitted = {
            let mut state = self.inner.state.borrow_mut();
            if state.running < self.inner.limit && state.queue.is_empty() {
                state.running += 1;
                true
            } else {
                false
            }
        };
        if admitted {
            debug!(in_flight = self.in_flight(), limit = self.inner.limit, "throttle admitted call");
            return start(&self.inner, args);
        }
        let queued = Deferred::new();
        let mut state = self.inner.state.borrow_mut();
        state.queue.push_back((args, queued.clone()));
        debug!(queued = state.queue.len(), limit = self.inner.limit, "throttle queued call");
        Ok(Eventual::Later(queued))
    }

    /// Converts into a plain deferred-returning function.
    #[must_use]
    pub fn into_fn(self) -> DeferredFn<A, T> {
        Rc::new(move |args| self.call(args))
    }
}

impl<A, T> Throttle<A, T> {
    /// Returns the number of calls currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.state.borrow().running
    }

    /// Returns the number of calls waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.state.borrow().queue.len()
    }

    /// Returns the concurrency limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.inner.limit
    }
}

impl<A, T> fmt::Debug for Throttle<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("limit", &self.inner.limit)
            .field("in_flight", &self.in_flight())
            .field("queued", &self.queued())
            .finish()
    }
}

impl<A, T> Inner<A, T> {
    fn finish(&self) {
        let mut state = self.state.borrow_mut();
        debug_assert!(state.running > 0, "throttle slot released twice");
        state.running = state.running.saturating_sub(1);
    }
}

/// Runs an admitted call. The slot is freed when its outcome settles.
fn start<A: 'static, T: Clone + 'static>(inner: &Rc<Inner<A, T>>, args: A) -> Outcome<T> {
    let outcome = match catch_unwind(AssertUnwindSafe(|| (inner.func)(args))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            inner.finish();
            let payload = resume_if_fault(payload);
            return Err(Error::from_panic(payload.as_ref()));
        }
    };
    match &outcome {
        Ok(Eventual::Later(d)) if d.is_pending() => {
            let inner = Rc::clone(inner);
            d.on_settled(move |_| {
                inner.finish();
                pump(&inner);
            });
        }
        _ => inner.finish(),
    }
    outcome
}

/// Dispatches queued calls, oldest first, while slots are free.
fn pump<A: 'static, T: Clone + 'static>(inner: &Rc<Inner<A, T>>) {
    loop {
        let (args, queued) = {
            let mut state = inner.state.borrow_mut();
            if state.running >= inner.limit {
                return;
            }
            let Some(next) = state.queue.pop_front() else {
                return;
            };
            state.running += 1;
            next
        };
        debug!(remaining = inner.state.borrow().queue.len(), "throttle dispatching queued call");
        settle_into(&queued, start(inner, args));
    }
}

/// Wraps `func` so that at most `limit` calls are in flight at once.
///
/// # Panics
///
/// Raises [`Fault::ZeroLimit`] if `limit` is zero.
#[track_caller]
#[must_use]
pub fn throttle<A: 'static, T: Clone + 'static>(func: DeferredFn<A, T>, limit: usize) -> DeferredFn<A, T> {
    Throttle::new(func, limit).into_fn()
}
