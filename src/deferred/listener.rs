use crate::error::Error;

/// Receives the settlement of a deferred value.
///
/// A listener is notified exactly once, synchronously, in the same turn the
/// value settles. Listeners registered on the same value run in registration
/// order.
pub trait Listener<T> {
    /// Called with the resolved value.
    fn on_resolved(self: Box<Self>, value: &T);

    /// Called with the rejection error.
    fn on_rejected(self: Box<Self>, error: &Error);
}

/// Adapts a closure over `Result<T, Error>` into a [`Listener`].
pub(crate) struct OnSettled<F>(pub(crate) F);

impl<T, F> Listener<T> for OnSettled<F>
where
    T: Clone,
    F: FnOnce(Result<T, Error>),
{
    fn on_resolved(self: Box<Self>, value: &T) {
        (self.0)(Ok(value.clone()));
    }

    fn on_rejected(self: Box<Self>, error: &Error) {
        (self.0)(Err(error.clone()));
    }
}
