//! Invocation over deferred arguments.
//!
//! [`invoke`] creates a call-frame for the call, lifts the arguments, and runs
//! the function inside the frame once every argument is available. The
//! function's result is flattened: a deferred result is forwarded into the
//! invocation's own deferred value, so observers only ever see plain values.
//!
//! ```
//! use tasync::{Error, Eventual, Outcome, invoke, ready};
//!
//! fn divide(x: i32, y: i32) -> Outcome<i32> {
//!     if y == 0 {
//!         return Err(Error::user("divide by zero"));
//!     }
//!     ready(x / y)
//! }
//!
//! let q = invoke(divide, (Eventual::Now(10), Eventual::Now(2))).unwrap();
//! assert_eq!(q.into_now(), Some(5));
//! ```

use std::any::type_name;
use std::panic::{AssertUnwindSafe, Location, catch_unwind};

use crate::deferred::{Deferred, Eventual, Outcome, Status, nests_deferred};
use crate::error::{Error, Fault, raise, resume_if_fault};
use crate::frame::Frame;
use crate::lift::{Advance, Cursor, Liftable};
use crate::tracer;
use crate::tracing_compat::{error, trace};

/// Conversion into an [`Outcome`].
///
/// Implemented for the three shapes an invoked function may return: an
/// [`Outcome`], an [`Eventual`], or a [`Deferred`].
pub trait IntoOutcome<T> {
    /// Performs the conversion.
    fn into_outcome(self) -> Outcome<T>;
}

impl<T> IntoOutcome<T> for Outcome<T> {
    fn into_outcome(self) -> Outcome<T> {
        self
    }
}

impl<T> IntoOutcome<T> for Eventual<T> {
    fn into_outcome(self) -> Outcome<T> {
        Ok(self)
    }
}

impl<T> IntoOutcome<T> for Deferred<T> {
    fn into_outcome(self) -> Outcome<T> {
        Ok(Eventual::Later(self))
    }
}

/// A function that can be invoked with lifted arguments `Args`.
///
/// Implemented for every `FnOnce` of up to eight parameters (arguments passed
/// as a tuple) and for `FnOnce(Vec<T>)` (arguments passed as a sequence).
pub trait Invocable<Args, R> {
    /// Calls the function.
    fn invoke_with(self, args: Args) -> Outcome<R>;
}

macro_rules! impl_invocable {
    ($($name:ident),*) => {
        impl<Func, Out, R, $($name),*> Invocable<($($name,)*), R> for Func
        where
            Func: FnOnce($($name),*) -> Out,
            Out: IntoOutcome<R>,
        {
            #[allow(non_snake_case)]
            fn invoke_with(self, ($($name,)*): ($($name,)*)) -> Outcome<R> {
                self($($name),*).into_outcome()
            }
        }
    };
}

impl_invocable!();
impl_invocable!(A);
impl_invocable!(A, B);
impl_invocable!(A, B, C);
impl_invocable!(A, B, C, D);
impl_invocable!(A, B, C, D, E);
impl_invocable!(A, B, C, D, E, F);
impl_invocable!(A, B, C, D, E, F, G);
impl_invocable!(A, B, C, D, E, F, G, H);

impl<Func, Out, R, T> Invocable<Vec<T>, R> for Func
where
    Func: FnOnce(Vec<T>) -> Out,
    Out: IntoOutcome<R>,
{
    fn invoke_with(self, args: Vec<T>) -> Outcome<R> {
        self(args).into_outcome()
    }
}

/// Invokes `f` once every argument in `args` is available.
///
/// The call runs in a fresh call-frame whose parent is the frame current at
/// this call. Results available synchronously are returned without allocating
/// a deferred value.
///
/// # Errors
///
/// Returns `Err` when an argument is already rejected, or when `f` fails or
/// panics synchronously. The error carries the reconstructed trace.
#[track_caller]
pub fn invoke<F, L, R>(f: F, args: L) -> Outcome<R>
where
    F: Invocable<L::Output, R> + 'static,
    L: Liftable,
    R: Clone + 'static,
{
    invoke_at(
        type_name::<F>(),
        Location::caller(),
        move |values| f.invoke_with(values),
        args,
    )
}

/// Invokes `method` on `receiver` once every argument in `args` is available.
///
/// The lifted arguments are passed to `method` as one value: a tuple or a
/// `Vec`, matching `args`.
///
/// # Errors
///
/// As for [`invoke`].
#[track_caller]
pub fn invoke_on<S, M, L, Out, R>(receiver: S, method: M, args: L) -> Outcome<R>
where
    S: 'static,
    M: FnOnce(S, L::Output) -> Out + 'static,
    Out: IntoOutcome<R>,
    L: Liftable,
    R: Clone + 'static,
{
    invoke_at(
        type_name::<M>(),
        Location::caller(),
        move |values| method(receiver, values).into_outcome(),
        args,
    )
}

pub(crate) fn invoke_at<C, L, R>(
    label: &'static str,
    location: &'static Location<'static>,
    call: C,
    args: L,
) -> Outcome<R>
where
    C: FnOnce(L::Output) -> Outcome<R> + 'static,
    L: Liftable,
    R: Clone + 'static,
{
    if nests_deferred::<R>() {
        raise(Fault::NestedDeferred);
    }
    let frame = Frame::current().child(label, location);
    match Cursor::new(args).advance() {
        Advance::Complete(values) => flatten(&frame, run(&frame, call, values)),
        Advance::Failed(error) => Err(error.traced(&frame)),
        Advance::Blocked(cursor, pending) => {
            trace!(label, path = ?frame.path(), "invocation waiting on arguments");
            let result = Deferred::new_in(frame.clone());
            let target = result.clone();
            cursor.resume_on(pending, move |lifted| match lifted {
                Ok(values) => settle_into(&target, run(&frame, call, values)),
                Err(error) => target.reject(error),
            });
            Ok(Eventual::Later(result))
        }
    }
}

/// Runs the body inside `frame`, behind the dispatch boundary, catching panics.
fn run<C, A, R>(frame: &Frame, call: C, args: A) -> Outcome<R>
where
    C: FnOnce(A) -> Outcome<R>,
{
    let _entered = frame.enter();
    match catch_unwind(AssertUnwindSafe(|| tracer::boundary(|| call(args)))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let payload = resume_if_fault(payload);
            Err(Error::from_panic(payload.as_ref()))
        }
    }
}

/// Normalizes a synchronous result: traced errors, settled deferred values
/// substituted, pending ones forwarded into a value owned by `frame`.
fn flatten<R: Clone + 'static>(frame: &Frame, outcome: Outcome<R>) -> Outcome<R> {
    match outcome {
        Ok(Eventual::Now(value)) => Ok(Eventual::Now(value)),
        Ok(Eventual::Later(inner)) if inner.status() != Status::Pending => {
            Eventual::Later(inner).collapse()
        }
        Ok(Eventual::Later(inner)) => {
            let result = Deferred::new_in(frame.clone());
            inner.forward_to(&result);
            Ok(Eventual::Later(result))
        }
        Err(error) => Err(error.traced(frame)),
    }
}

/// Settles `target` with `outcome`, forwarding a pending result.
pub(crate) fn settle_into<R: Clone + 'static>(target: &Deferred<R>, outcome: Outcome<R>) {
    match outcome {
        Ok(Eventual::Now(value)) => target.resolve(value),
        Ok(Eventual::Later(inner)) => inner.forward_to(target),
        Err(error) => target.reject(error),
    }
}

/// Calls `on_settled` with the settlement of `value`.
///
/// Values that are already available are reported synchronously, before
/// `then` returns. A panic inside `on_settled` is logged and does not
/// propagate, unless it is a framework fault.
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let seen = Rc::new(Cell::new(0));
/// let sink = seen.clone();
/// tasync::then(tasync::ready(5), move |r| sink.set(r.unwrap()));
/// assert_eq!(seen.get(), 5);
/// ```
pub fn then<T, V, F>(value: V, on_settled: F)
where
    T: Clone + 'static,
    V: IntoOutcome<T>,
    F: FnOnce(Result<T, Error>) + 'static,
{
    match value.into_outcome() {
        Ok(Eventual::Now(value)) => report(on_settled, Ok(value)),
        Ok(Eventual::Later(d)) => d.observe(move |result| report(on_settled, result)),
        Err(error) => report(on_settled, Err(error)),
    }
}

fn report<T, F>(on_settled: F, result: Result<T, Error>)
where
    F: FnOnce(Result<T, Error>),
{
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| on_settled(result))) {
        let payload = resume_if_fault(payload);
        let err = Error::from_panic(payload.as_ref());
        error!(error = %err, "settlement callback panicked");
    }
}

/// Runs `body` as an invocation and, if it fails, `handler` with the error.
///
/// The handler runs whether the failure is synchronous or happens later; its
/// outcome becomes the result.
///
/// # Errors
///
/// Returns `Err` when the handler itself fails synchronously.
#[track_caller]
pub fn trycatch<T, B, BodyOut, H, HandlerOut>(body: B, handler: H) -> Outcome<T>
where
    T: Clone + 'static,
    B: FnOnce() -> BodyOut + 'static,
    BodyOut: IntoOutcome<T>,
    H: FnOnce(Error) -> HandlerOut + 'static,
    HandlerOut: IntoOutcome<T>,
{
    let location = Location::caller();
    let first = invoke_at(type_name::<B>(), location, move |()| body().into_outcome(), ());
    let recover = move |error: Error| {
        invoke_at(
            type_name::<H>(),
            location,
            move |(error,)| handler(error).into_outcome(),
            (Eventual::Now(error),),
        )
    };
    match first {
        Ok(Eventual::Now(value)) => Ok(Eventual::Now(value)),
        Err(error) => recover(error),
        Ok(Eventual::Later(pending)) => {
            let parent = Frame::current();
            let result = Deferred::new();
            let target = result.clone();
            pending.observe(move |settled| match settled {
                Ok(value) => target.resolve(value),
                Err(error) => {
                    let _entered = parent.enter();
                    settle_into(&target, recover(error));
                }
            });
            Ok(Eventual::Later(result))
        }
    }
}
