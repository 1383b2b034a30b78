//! Lifting: waiting on a sequence of possibly pending values.
//!
//! [`lift`] scans a sequence left to right. Settled deferred slots are
//! substituted by their values, the first pending slot suspends the scan
//! until it settles, and the first rejected slot rejects the whole lift. Slots
//! after a rejection are abandoned whatever their state.
//!
//! A sequence is either a `Vec<A>` or a tuple of up to eight slots, where each
//! slot is an [`Arg`]: an [`Eventual`], a [`Deferred`] or an [`Outcome`].
//!
//! ```
//! use tasync::{Deferred, Eventual, lift};
//!
//! let d = Deferred::new();
//! let out = lift((Eventual::Now(1), d.clone())).unwrap();
//! let Eventual::Later(both) = out else { unreachable!() };
//! d.resolve("two");
//! assert_eq!(both.value(), Some((1, "two")));
//! ```

use crate::deferred::{Deferred, Eventual, Listener, Outcome, Status};
use crate::error::{Error, Fault, raise};

/// What a slot looks like when the scan reaches it.
pub enum Step {
    /// The slot holds a plain value.
    Ready,
    /// The slot is pending; the scan resumes when it settles.
    Blocked(Box<dyn Pending>),
    /// The slot is rejected.
    Failed(Error),
}

/// A pending slot the scan can wait on.
pub trait Pending {
    /// Calls `wake` once the slot settles, whichever way.
    fn subscribe(self: Box<Self>, wake: Box<dyn FnOnce()>);
}

struct Wake(Box<dyn FnOnce()>);

impl<T> Listener<T> for Wake {
    fn on_resolved(self: Box<Self>, _value: &T) {
        (self.0)();
    }

    fn on_rejected(self: Box<Self>, _error: &Error) {
        (self.0)();
    }
}

impl<T: 'static> Pending for Deferred<T> {
    fn subscribe(self: Box<Self>, wake: Box<dyn FnOnce()>) {
        self.register(Box::new(Wake(wake)));
    }
}

/// One slot of a lifted sequence.
pub trait Arg: 'static {
    /// The plain value the slot holds once settled.
    type Value: 'static;

    /// Inspects the slot, substituting a settled value where possible.
    fn settle(&mut self) -> Step;

    /// Extracts the plain value.
    ///
    /// # Panics
    ///
    /// Raises [`Fault::UnsettledSlot`] if the slot has not settled.
    fn take(self) -> Self::Value;
}

impl<T: Clone + 'static> Arg for Eventual<T> {
    type Value = T;

    fn settle(&mut self) -> Step {
        let Self::Later(d) = self else {
            return Step::Ready;
        };
        match d.status() {
            Status::Pending => Step::Blocked(Box::new(d.clone())),
            Status::Rejected => match d.error() {
                Some(error) => Step::Failed(error),
                None => raise(Fault::UnsettledSlot),
            },
            Status::Resolved => {
                let value = d.value().unwrap_or_else(|| raise(Fault::UnsettledSlot));
                *self = Self::Now(value);
                Step::Ready
            }
        }
    }

    fn take(self) -> T {
        match self {
            Self::Now(value) => value,
            Self::Later(d) => d.value().unwrap_or_else(|| raise(Fault::UnsettledSlot)),
        }
    }
}

impl<T: Clone + 'static> Arg for Deferred<T> {
    type Value = T;

    fn settle(&mut self) -> Step {
        match self.status() {
            Status::Pending => Step::Blocked(Box::new(self.clone())),
            Status::Resolved => Step::Ready,
            Status::Rejected => match self.error() {
                Some(error) => Step::Failed(error),
                None => raise(Fault::UnsettledSlot),
            },
        }
    }

    fn take(self) -> T {
        self.value().unwrap_or_else(|| raise(Fault::UnsettledSlot))
    }
}

impl<T: Clone + 'static> Arg for Outcome<T> {
    type Value = T;

    fn settle(&mut self) -> Step {
        match self {
            Ok(eventual) => eventual.settle(),
            Err(error) => Step::Failed(error.clone()),
        }
    }

    fn take(self) -> T {
        match self {
            Ok(eventual) => eventual.take(),
            Err(_) => raise(Fault::UnsettledSlot),
        }
    }
}

/// A sequence of slots that can be lifted.
pub trait Liftable: 'static {
    /// The sequence with every slot replaced by its plain value.
    type Output: 'static;

    /// Returns the number of slots.
    fn slots(&self) -> usize;

    /// Inspects the slot at `index`.
    fn settle_at(&mut self, index: usize) -> Step;

    /// Extracts every plain value. All slots must be settled.
    fn finish(self) -> Self::Output;
}

impl<A: Arg> Liftable for Vec<A> {
    type Output = Vec<A::Value>;

    fn slots(&self) -> usize {
        self.len()
    }

    fn settle_at(&mut self, index: usize) -> Step {
        self[index].settle()
    }

    fn finish(self) -> Self::Output {
        self.into_iter().map(Arg::take).collect()
    }
}

macro_rules! impl_liftable_tuple {
    ($len:literal; $($idx:tt $name:ident),*) => {
        impl<$($name: Arg),*> Liftable for ($($name,)*) {
            type Output = ($($name::Value,)*);

            fn slots(&self) -> usize {
                $len
            }

            #[allow(unused_variables)]
            fn settle_at(&mut self, index: usize) -> Step {
                $(
                    if index == $idx {
                        return self.$idx.settle();
                    }
                )*
                Step::Ready
            }

            fn finish(self) -> Self::Output {
                ($(self.$idx.take(),)*)
            }
        }
    };
}

impl_liftable_tuple!(0;);
impl_liftable_tuple!(1; 0 A);
impl_liftable_tuple!(2; 0 A, 1 B);
impl_liftable_tuple!(3; 0 A, 1 B, 2 C);
impl_liftable_tuple!(4; 0 A, 1 B, 2 C, 3 D);
impl_liftable_tuple!(5; 0 A, 1 B, 2 C, 3 D, 4 E);
impl_liftable_tuple!(6; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_liftable_tuple!(7; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_liftable_tuple!(8; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);

/// The working state of a lift: the sequence and the next slot to examine.
pub(crate) struct Cursor<L> {
    seq: L,
    index: usize,
}

pub(crate) enum Advance<L: Liftable> {
    Complete(L::Output),
    Failed(Error),
    Blocked(Cursor<L>, Box<dyn Pending>),
}

impl<L: Liftable> Cursor<L> {
    pub(crate) fn new(seq: L) -> Self {
        Self { seq, index: 0 }
    }

    /// Scans forward until the end, the first pending slot or the first
    /// rejected slot.
    pub(crate) fn advance(mut self) -> Advance<L> {
        while self.index < self.seq.slots() {
            match self.seq.settle_at(self.index) {
                Step::Ready => self.index += 1,
                Step::Failed(error) => return Advance::Failed(error),
                Step::Blocked(pending) => return Advance::Blocked(self, pending),
            }
        }
        Advance::Complete(self.seq.finish())
    }

    /// Resumes the scan whenever `pending` settles, until the lift completes.
    pub(crate) fn resume_on<F>(self, pending: Box<dyn Pending>, done: F)
    where
        F: FnOnce(Result<L::Output, Error>) + 'static,
    {
        pending.subscribe(Box::new(move || match self.advance() {
            Advance::Complete(output) => done(Ok(output)),
            Advance::Failed(error) => done(Err(error)),
            Advance::Blocked(cursor, next) => cursor.resume_on(next, done),
        }));
    }
}

/// Waits until every slot of `seq` settles.
///
/// Returns `Ok(Now(values))` when nothing is pending, `Err(e)` when the scan
/// reaches a rejected slot synchronously, and otherwise `Ok(Later(d))` where
/// `d` settles once the scan completes.
///
/// # Errors
///
/// Returns the error of the first rejected slot reached synchronously.
pub fn lift<L: Liftable>(seq: L) -> Outcome<L::Output> {
    match Cursor::new(seq).advance() {
        Advance::Complete(output) => Ok(Eventual::Now(output)),
        Advance::Failed(error) => Err(error),
        Advance::Blocked(cursor, pending) => {
            let lifted = Deferred::new();
            let target = lifted.clone();
            cursor.resume_on(pending, move |result| target.settle(result));
            Ok(Eventual::Later(lifted))
        }
    }
}
