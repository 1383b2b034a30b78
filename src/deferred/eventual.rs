use crate::error::Error;

use super::{Deferred, Status};

/// A value that is either available now or later.
///
/// Every crate API that may complete synchronously returns an `Eventual`
/// (wrapped in an [`Outcome`]) so that a deferred value is only allocated when
/// something is actually pending. A resolved value is never itself deferred:
/// `Eventual<Deferred<T>>` is not produced anywhere in the crate.
#[derive(Debug)]
pub enum Eventual<T> {
    /// Available synchronously.
    Now(T),
    /// Available once the deferred value settles.
    Later(Deferred<T>),
}

/// The result of an operation that may complete later.
///
/// `Ok(Now(v))` and `Err(e)` are synchronous completions, `Ok(Later(d))` is
/// pending at return time.
pub type Outcome<T> = Result<Eventual<T>, Error>;

/// Returns a synchronously successful outcome.
///
/// ```
/// let out = tasync::ready(3);
/// assert!(matches!(out, Ok(tasync::Eventual::Now(3))));
/// ```
pub fn ready<T>(value: T) -> Outcome<T> {
    Ok(Eventual::Now(value))
}

impl<T: Clone> Clone for Eventual<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Now(value) => Self::Now(value.clone()),
            Self::Later(d) => Self::Later(d.clone()),
        }
    }
}

impl<T> From<Deferred<T>> for Eventual<T> {
    fn from(d: Deferred<T>) -> Self {
        Self::Later(d)
    }
}

impl<T> Eventual<T> {
    /// Returns true if the value is available synchronously.
    #[must_use]
    pub fn is_now(&self) -> bool {
        matches!(self, Self::Now(_))
    }

    /// Returns the synchronous value, if any.
    #[must_use]
    pub fn now(&self) -> Option<&T> {
        match self {
            Self::Now(value) => Some(value),
            Self::Later(_) => None,
        }
    }

    /// Returns the synchronous value, if any.
    #[must_use]
    pub fn into_now(self) -> Option<T> {
        match self {
            Self::Now(value) => Some(value),
            Self::Later(_) => None,
        }
    }

    /// Converts into a deferred value, allocating one for `Now`.
    #[must_use]
    pub fn into_deferred(self) -> Deferred<T> {
        match self {
            Self::Now(value) => Deferred::resolved(value),
            Self::Later(d) => d,
        }
    }
}

impl<T: Clone + 'static> Eventual<T> {
    /// Replaces an already settled deferred value by its settlement.
    ///
    /// # Errors
    ///
    /// Returns the rejection error of a rejected deferred value.
    pub fn collapse(self) -> Outcome<T> {
        match self {
            Self::Now(value) => Ok(Self::Now(value)),
            Self::Later(d) => match d.status() {
                Status::Pending => Ok(Self::Later(d)),
                _ => d.outcome().map_or(Ok(Self::Later(d)), |r| r.map(Self::Now)),
            },
        }
    }
}
