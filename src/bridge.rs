//! Conversion between callback-style and deferred-returning functions.
//!
//! A callback-style function receives its arguments and a [`Callback`] it
//! calls exactly once with the result. [`adapt`] turns it into a function
//! returning an [`Outcome`]; [`unadapt`] goes the other way.
//!
//! Conversions are memoized in a [`Bridge`] registry keyed by function
//! identity. Adapting the same function twice yields the same wrapper, and
//! each wrapper remembers where it came from, so `unadapt(&adapt(&f))` hands
//! back `f` itself. The registry only holds weak references; entries whose
//! source or wrapper was dropped are pruned.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use hashbrown::HashMap;

use crate::deferred::{Deferred, Eventual, Outcome};
use crate::error::{Error, resume_if_fault};
use crate::tracing_compat::trace;

/// Completion callback of a callback-style function.
pub type Callback<T> = Box<dyn FnOnce(Result<T, Error>)>;

/// A callback-style function taking `A` and completing with `T`.
pub type CallbackFn<A, T> = Rc<dyn Fn(A, Callback<T>)>;

/// A function taking `A` and returning an [`Outcome`] of `T`.
pub type DeferredFn<A, T> = Rc<dyn Fn(A) -> Outcome<T>>;

struct Entry {
    wrapper: Box<dyn Any>,
    alive: Box<dyn Fn() -> bool>,
}

type Table = RefCell<HashMap<usize, Entry>>;

fn identity<F: ?Sized>(f: &Rc<F>) -> usize {
    Rc::as_ptr(f).cast::<()>() as usize
}

/// Registry memoizing adapted and unadapted wrappers.
#[derive(Default)]
pub struct Bridge {
    to_deferred: Table,
    to_callback: Table,
}

impl Bridge {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a callback-style function into a deferred-returning one.
    ///
    /// A completion before `f` returns yields `Ok(Now(v))` or `Err(e)`;
    /// otherwise the wrapper returns `Ok(Later(d))` and `d` settles when the
    /// callback runs. Panics raised by `f` propagate to the caller.
    #[must_use]
    pub fn adapt<A, T>(&self, f: &CallbackFn<A, T>) -> DeferredFn<A, T>
    where
        A: 'static,
        T: 'static,
    {
        if let Some(wrapper) = lookup::<dyn Fn(A) -> Outcome<T>>(&self.to_deferred, identity(f)) {
            return wrapper;
        }
        let source = Rc::clone(f);
        let wrapper: DeferredFn<A, T> = Rc::new(move |args: A| call_adapted(&source, args));
        record(&self.to_deferred, f, &wrapper);
        record(&self.to_callback, &wrapper, f);
        trace!(source = identity(f), wrapper = identity(&wrapper), "adapted");
        wrapper
    }

    /// Converts a deferred-returning function into a callback-style one.
    ///
    /// The callback receives `Err` when `f` fails or panics synchronously,
    /// the settlement of the deferred value when `f` returns one, and the
    /// plain value otherwise.
    #[must_use]
    pub fn unadapt<A, T>(&self, f: &DeferredFn<A, T>) -> CallbackFn<A, T>
    where
        A: 'static,
        T: Clone + 'static,
    {
        if let Some(wrapper) = lookup::<dyn Fn(A, Callback<T>)>(&self.to_callback, identity(f)) {
            return wrapper;
        }
        let source = Rc::clone(f);
        let wrapper: CallbackFn<A, T> = Rc::new(move |args: A, callback: Callback<T>| {
            call_unadapted(&source, args, callback);
        });
        record(&self.to_callback, f, &wrapper);
        record(&self.to_deferred, &wrapper, f);
        trace!(source = identity(f), wrapper = identity(&wrapper), "unadapted");
        wrapper
    }

    /// Drops entries whose source or wrapper is gone.
    pub fn prune(&self) {
        for table in [&self.to_deferred, &self.to_callback] {
            table.borrow_mut().retain(|_, entry| (entry.alive)());
        }
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prune();
        self.to_deferred.borrow().len() + self.to_callback.borrow().len()
    }

    /// Returns true if no live entry remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("to_deferred", &self.to_deferred.borrow().len())
            .field("to_callback", &self.to_callback.borrow().len())
            .finish()
    }
}

fn lookup<W: ?Sized + 'static>(table: &Table, key: usize) -> Option<Rc<W>> {
    let mut entries = table.borrow_mut();
    let entry = entries.get(&key)?;
    if !(entry.alive)() {
        entries.remove(&key);
        return None;
    }
    entry.wrapper.downcast_ref::<Weak<W>>()?.upgrade()
}

fn record<S, W>(table: &Table, source: &Rc<S>, wrapper: &Rc<W>)
where
    S: ?Sized + 'static,
    W: ?Sized + 'static,
{
    let source_alive = Rc::downgrade(source);
    let wrapper_alive = Rc::downgrade(wrapper);
    let entry = Entry {
        wrapper: Box::new(Rc::downgrade(wrapper)),
        alive: Box::new(move || source_alive.strong_count() > 0 && wrapper_alive.strong_count() > 0),
    };
    let mut entries = table.borrow_mut();
    entries.retain(|_, entry| (entry.alive)());
    entries.insert(identity(source), entry);
}

enum Slot<T> {
    Waiting,
    Done(Result<T, Error>),
    Forward(Deferred<T>),
}

fn call_adapted<A, T: 'static>(source: &CallbackFn<A, T>, args: A) -> Outcome<T> {
    let slot = Rc::new(RefCell::new(Slot::Waiting));
    let completion = Rc::clone(&slot);
    source(
        args,
        Box::new(move |result| {
            let forward = match &*completion.borrow() {
                Slot::Forward(d) => Some(d.clone()),
                _ => None,
            };
            match forward {
                Some(d) => d.settle(result),
                None => *completion.borrow_mut() = Slot::Done(result),
            }
        }),
    );

    let mut state = slot.borrow_mut();
    match std::mem::replace(&mut *state, Slot::Waiting) {
        Slot::Done(result) => result.map(Eventual::Now),
        Slot::Waiting | Slot::Forward(_) => {
            let d = Deferred::new();
            *state = Slot::Forward(d.clone());
            Ok(Eventual::Later(d))
        }
    }
}

fn call_unadapted<A, T>(source: &DeferredFn<A, T>, args: A, callback: Callback<T>)
where
    T: Clone + 'static,
{
    let outcome = match catch_unwind(AssertUnwindSafe(|| source(args))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let payload = resume_if_fault(payload);
            Err(Error::from_panic(payload.as_ref()))
        }
    };
    match outcome {
        Ok(Eventual::Now(value)) => callback(Ok(value)),
        Ok(Eventual::Later(d)) => d.observe(callback),
        Err(error) => callback(Err(error)),
    }
}

thread_local! {
    static DEFAULT: Bridge = Bridge::new();
}

/// Adapts `f` through the thread's default [`Bridge`].
#[must_use]
pub fn adapt<A: 'static, T: 'static>(f: &CallbackFn<A, T>) -> DeferredFn<A, T> {
    DEFAULT.with(|bridge| bridge.adapt(f))
}

/// Unadapts `f` through the thread's default [`Bridge`].
#[must_use]
pub fn unadapt<A: 'static, T: Clone + 'static>(f: &DeferredFn<A, T>) -> CallbackFn<A, T> {
    DEFAULT.with(|bridge| bridge.unadapt(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_double() -> CallbackFn<i32, i32> {
        Rc::new(|x: i32, done: Callback<i32>| {
            if x < 0 {
                done(Err(Error::user("negative")));
            } else {
                done(Ok(x * 2));
            }
        })
    }

    #[test]
    fn synchronous_completion_does_not_allocate() {
        let bridge = Bridge::new();
        let f = bridge.adapt(&sync_double());
        assert!(matches!(f(4), Ok(Eventual::Now(8))));
        assert_eq!(f(-1).err().map(|e| e.to_string()), Some("negative".into()));
    }

    #[test]
    fn late_completion_settles_deferred() {
        let bridge = Bridge::new();
        let parked: Rc<RefCell<Option<Callback<&'static str>>>> = Rc::new(RefCell::new(None));
        let park = Rc::clone(&parked);
        let source: CallbackFn<(), &'static str> = Rc::new(move |(), done: Callback<&'static str>| {
            park.replace(Some(done));
        });
        let f = bridge.adapt(&source);
        let Ok(Eventual::Later(d)) = f(()) else {
            panic!("expected pending result");
        };
        let done = parked.borrow_mut().take().expect("callback parked");
        done(Ok("late"));
        assert_eq!(d.value(), Some("late"));
    }

    #[test]
    fn adapt_is_memoized_and_reversible() {
        let bridge = Bridge::new();
        let f = sync_double();
        let a1 = bridge.adapt(&f);
        let a2 = bridge.adapt(&f);
        assert!(Rc::ptr_eq(&a1, &a2));
        assert!(Rc::ptr_eq(&bridge.unadapt(&a1), &f));
    }

    #[test]
    fn unadapt_is_memoized_and_reversible() {
        let bridge = Bridge::new();
        let g: DeferredFn<i32, i32> = Rc::new(|x: i32| crate::ready(x + 1));
        let u = bridge.unadapt(&g);
        assert!(Rc::ptr_eq(&bridge.unadapt(&g), &u));
        assert!(Rc::ptr_eq(&bridge.adapt(&u), &g));
    }

    #[test]
    fn unadapt_reports_every_outcome_shape() {
        let bridge = Bridge::new();
        let pending = Deferred::new();
        let handle = pending.clone();
        let g: DeferredFn<u8, i32> = Rc::new(move |mode: u8| match mode {
            0 => crate::ready(1),
            1 => Err(Error::user("sync failure")),
            2 => Ok(Eventual::Later(handle.clone())),
            _ => panic!("unsupported mode"),
        });
        let u = bridge.unadapt(&g);
        let seen = Rc::new(RefCell::new(Vec::new()));
        for mode in 0..4 {
            let sink = Rc::clone(&seen);
            u(
                mode,
                Box::new(move |r| {
                    sink.borrow_mut().push(r.map_err(|e| e.to_string()));
                }),
            );
        }
        pending.resolve(2);
        assert_eq!(
            *seen.borrow(),
            vec![
                Ok(1),
                Err("sync failure".to_string()),
                Err("unsupported mode".to_string()),
                Ok(2),
            ]
        );
    }

    #[test]
    fn dead_entries_are_pruned() {
        let bridge = Bridge::new();
        let f = sync_double();
        let wrapper = bridge.adapt(&f);
        assert_eq!(bridge.len(), 2);
        drop(wrapper);
        assert!(bridge.is_empty());

        let again = bridge.adapt(&f);
        assert!(matches!(again(1), Ok(Eventual::Now(2))));
        assert_eq!(bridge.len(), 2);
        drop(f);
        assert_eq!(bridge.len(), 2);
    }

    #[test]
    fn free_functions_share_the_thread_registry() {
        let f = sync_double();
        assert!(Rc::ptr_eq(&adapt(&f), &adapt(&f)));
    }
}
