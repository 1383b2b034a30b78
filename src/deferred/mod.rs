//! Deferred values.
//!
//! A [`Deferred`] is a cell for a value that becomes available later. It moves
//! exactly once from pending to either resolved or rejected, and notifies its
//! listeners synchronously when it does:
//!
//! ```text
//! Pending(listeners) ──resolve──▶ Resolved(value)
//!         │
//!         └──────────reject────▶ Rejected(error + trace)
//! ```
//!
//! Settling twice and registering on a settled value are framework faults.
//! The aborting methods raise them; the `try_*` methods return them.
//!
//! Most APIs of the crate return an [`Eventual`] instead of a bare deferred
//! value, so results that are available synchronously never allocate.

mod eventual;
mod listener;
mod wait;

pub use eventual::{Eventual, Outcome, ready};
pub use listener::Listener;
pub use wait::Wait;

pub(crate) use listener::OnSettled;

use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::{Error, Fault, raise, resume_if_fault};
use crate::frame::Frame;
use crate::tracing_compat::{error, trace};

type Listeners<T> = SmallVec<[Box<dyn Listener<T>>; 2]>;

thread_local! {
    static FORWARDS: RefCell<VecDeque<Box<dyn FnOnce()>>> = const { RefCell::new(VecDeque::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Settlement status of a deferred value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with an error.
    Rejected,
}

enum State<T> {
    Pending(Listeners<T>),
    Resolved(Rc<T>),
    Rejected(Error),
}

struct Shared<T> {
    state: RefCell<State<T>>,
    frame: Frame,
}

/// A value that is not available yet.
///
/// Cloning yields another handle to the same cell.
///
/// # Example
///
/// ```
/// use tasync::{Deferred, Status};
///
/// let d = Deferred::new();
/// let seen = std::rc::Rc::new(std::cell::Cell::new(0));
/// let sink = seen.clone();
/// d.on_settled(move |r: Result<i32, tasync::Error>| sink.set(r.unwrap()));
/// d.resolve(7);
/// assert_eq!(d.status(), Status::Resolved);
/// assert_eq!(seen.get(), 7);
/// ```
pub struct Deferred<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deferred<T> {
    /// Creates a pending value owned by the current frame.
    #[must_use]
    pub fn new() -> Self {
        Self::new_in(Frame::current())
    }

    pub(crate) fn new_in(frame: Frame) -> Self {
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(State::Pending(SmallVec::new())),
                frame,
            }),
        }
    }

    /// Creates an already resolved value.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        let d = Self::new();
        d.resolve(value);
        d
    }

    /// Creates an already rejected value.
    #[track_caller]
    #[must_use]
    pub fn rejected(error: Error) -> Self {
        let d = Self::new();
        d.reject(error);
        d
    }

    /// Resolves the value and notifies every listener.
    ///
    /// # Panics
    ///
    /// Raises [`Fault::AlreadySettled`] if the value already settled, and
    /// [`Fault::NestedDeferred`] if `T` is itself a deferred value.
    #[track_caller]
    pub fn resolve(&self, value: T) {
        if let Err(fault) = self.try_resolve(value) {
            raise(fault);
        }
    }

    /// Resolves the value, or returns a fault if it already settled or if
    /// `T` is itself a deferred value.
    pub fn try_resolve(&self, value: T) -> Result<(), Fault> {
        if nests_deferred::<T>() {
            return Err(Fault::NestedDeferred);
        }
        let value = Rc::new(value);
        let listeners = {
            let mut state = self.shared.state.borrow_mut();
            let State::Pending(listeners) = &mut *state else {
                return Err(Fault::AlreadySettled);
            };
            let listeners = std::mem::take(listeners);
            *state = State::Resolved(Rc::clone(&value));
            listeners
        };
        trace!(
            path = ?self.path(),
            status = "resolved",
            listeners = listeners.len(),
            "deferred settled"
        );
        notify(listeners, |listener| listener.on_resolved(&value));
        Ok(())
    }

    /// Rejects the value and notifies every listener.
    ///
    /// The error gets a trace reconstructed from this value's frame unless it
    /// already carries one.
    ///
    /// # Panics
    ///
    /// Raises [`Fault::AlreadySettled`] if the value already settled.
    #[track_caller]
    pub fn reject(&self, error: Error) {
        if let Err(fault) = self.try_reject(error) {
            raise(fault);
        }
    }

    /// Rejects the value, or returns a fault if it already settled.
    pub fn try_reject(&self, error: Error) -> Result<(), Fault> {
        if !self.is_pending() {
            return Err(Fault::AlreadySettled);
        }
        let error = error.traced(&self.shared.frame);
        let listeners = {
            let mut state = self.shared.state.borrow_mut();
            let State::Pending(listeners) = &mut *state else {
                return Err(Fault::AlreadySettled);
            };
            let listeners = std::mem::take(listeners);
            *state = State::Rejected(error.clone());
            listeners
        };
        trace!(
            path = ?self.path(),
            status = "rejected",
            error = %error,
            listeners = listeners.len(),
            "deferred settled"
        );
        notify(listeners, |listener| listener.on_rejected(&error));
        Ok(())
    }

    /// Settles with either side of `result`.
    #[track_caller]
    pub fn settle(&self, result: Result<T, Error>) {
        match result {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }

    /// Registers a listener.
    ///
    /// # Panics
    ///
    /// Raises [`Fault::RegisterAfterSettle`] if the value already settled.
    #[track_caller]
    pub fn register(&self, listener: Box<dyn Listener<T>>) {
        if let Err(fault) = self.try_register(listener) {
            raise(fault);
        }
    }

    /// Registers a listener, or returns a fault if the value already settled.
    pub fn try_register(&self, listener: Box<dyn Listener<T>>) -> Result<(), Fault> {
        match &mut *self.shared.state.borrow_mut() {
            State::Pending(listeners) => {
                listeners.push(listener);
                Ok(())
            }
            _ => Err(Fault::RegisterAfterSettle),
        }
    }

    /// Returns the settlement status.
    #[must_use]
    pub fn status(&self) -> Status {
        match &*self.shared.state.borrow() {
            State::Pending(_) => Status::Pending,
            State::Resolved(_) => Status::Resolved,
            State::Rejected(_) => Status::Rejected,
        }
    }

    /// Returns true while the value has not settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// Returns the rejection error, if rejected.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        match &*self.shared.state.borrow() {
            State::Rejected(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Returns the number of listeners waiting for settlement.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        match &*self.shared.state.borrow() {
            State::Pending(listeners) => listeners.len(),
            _ => 0,
        }
    }

    /// Returns the frame this value was created under.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.shared.frame
    }

    /// Returns the path of the owning frame.
    #[must_use]
    pub fn path(&self) -> Vec<u64> {
        self.shared.frame.path()
    }

    /// Returns true if both handles refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Clone + 'static> Deferred<T> {
    /// Returns a clone of the resolved value, if resolved.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        match &*self.shared.state.borrow() {
            State::Resolved(value) => Some(T::clone(value)),
            _ => None,
        }
    }

    /// Returns the settlement as a `Result`, or `None` while pending.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<T, Error>> {
        match &*self.shared.state.borrow() {
            State::Pending(_) => None,
            State::Resolved(value) => Some(Ok(T::clone(value))),
            State::Rejected(error) => Some(Err(error.clone())),
        }
    }

    /// Registers a closure called with the settlement.
    ///
    /// # Panics
    ///
    /// Raises [`Fault::RegisterAfterSettle`] if the value already settled.
    #[track_caller]
    pub fn on_settled<F>(&self, f: F)
    where
        F: FnOnce(Result<T, Error>) + 'static,
    {
        self.register(Box::new(OnSettled(f)));
    }

    /// Calls `f` with the settlement now if settled, otherwise once it settles.
    pub(crate) fn observe<F>(&self, f: F)
    where
        F: FnOnce(Result<T, Error>) + 'static,
    {
        match self.outcome() {
            Some(outcome) => f(outcome),
            None => self.on_settled(f),
        }
    }

    /// Settles `target` the same way this value settles.
    ///
    /// Forwarding is drained by a per-thread queue: a chain of forwarded
    /// values settles hop by hop in a loop, before the outermost `resolve` or
    /// `reject` returns. A target whose settlement is queued behind the one in
    /// progress settles after the remaining listeners of its source.
    ///
    /// # Panics
    ///
    /// Raises [`Fault::AlreadySettled`] when this value settles if `target`
    /// settled in the meantime.
    pub fn forward_to(&self, target: &Self) {
        let target = target.clone();
        self.observe(move |result| settle_forwarded(Box::new(move || target.settle(result))));
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("status", &self.status())
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

/// Queues a forwarded settlement and drains the queue unless an outer call
/// on this thread is already draining it.
fn settle_forwarded(settle: Box<dyn FnOnce()>) {
    FORWARDS.with(|queue| queue.borrow_mut().push_back(settle));
    if DRAINING.with(|draining| draining.replace(true)) {
        return;
    }
    let _drain = DrainGuard;
    while let Some(settle) = FORWARDS.with(|queue| queue.borrow_mut().pop_front()) {
        settle();
    }
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = DRAINING.try_with(|draining| draining.set(false));
        // A fault unwound through the drain; the queued hops are abandoned.
        if std::thread::panicking() {
            let _ = FORWARDS.try_with(|queue| queue.borrow_mut().clear());
        }
    }
}

/// Returns true if `T` is a [`Deferred`] or an [`Eventual`] of any payload.
///
/// Resolving with such a value would nest one deferred value in another;
/// results must be flattened with [`Deferred::forward_to`] instead.
pub(crate) fn nests_deferred<T: ?Sized>() -> bool {
    fn head(name: &str) -> &str {
        name.split_once('<').map_or(name, |(head, _)| head)
    }
    let name = head(type_name::<T>());
    name == head(type_name::<Deferred<()>>()) || name == head(type_name::<Eventual<()>>())
}

/// Notifies listeners in order. A panicking listener is logged and does not
/// stop the rest, unless it raised a framework fault.
fn notify<T>(listeners: Listeners<T>, mut deliver: impl FnMut(Box<dyn Listener<T>>)) {
    for listener in listeners {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| deliver(listener))) {
            let payload = resume_if_fault(payload);
            let err = Error::from_panic(payload.as_ref());
            error!(error = %err, "listener panicked");
        }
    }
}
