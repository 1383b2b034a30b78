//! Error types and error handling strategy for tasync.
//!
//! Three kinds of failure exist:
//!
//! - **User faults**: an invoked function returned `Err` or panicked. These
//!   become rejected deferred values carrying a reconstructed trace.
//! - **Upstream rejections**: an argument was already rejected. The error
//!   travels on unchanged and keeps the first trace attached to it.
//! - **Framework faults** ([`Fault`]): an internal invariant was violated
//!   (settling twice, registering late, ...). These signal a usage bug and are
//!   raised as panics that listener guards never swallow.

use core::fmt;
use std::any::Any;
use std::panic::Location;
use std::sync::Arc;

use crate::frame::Frame;
use crate::tracer::{self, Snapshot, Trace};
use crate::tracing_compat::error;

/// The kind of error carried by a rejected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Raised explicitly by user code.
    User,
    /// A panic caught while running an invoked function.
    Panicked,
}

impl ErrorKind {
    /// Returns the kind name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Panicked => "panicked",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error value of a rejected deferred value.
///
/// Cloning is cheap. The reconstructed cross-hop [`Trace`] is attached the
/// first time the error rejects a deferred value and is kept from then on.
///
/// # Example
///
/// ```
/// use tasync::{Error, ErrorKind};
///
/// let err = Error::user("divide by zero");
/// assert_eq!(err.kind(), ErrorKind::User);
/// assert_eq!(err.to_string(), "divide by zero");
/// assert!(err.trace().is_none());
/// ```
#[derive(Clone)]
pub struct Error {
    inner: Arc<Inner>,
}

#[derive(Clone)]
struct Inner {
    kind: ErrorKind,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    origin: Option<Snapshot>,
    trace: Option<Arc<Trace>>,
}

impl Error {
    #[track_caller]
    fn with_kind(kind: ErrorKind, message: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                message,
                source: None,
                origin: Snapshot::capture("raised", Location::caller()),
                trace: None,
            }),
        }
    }

    /// Creates a user error with the given message.
    #[track_caller]
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::User, message.into())
    }

    /// Wraps an arbitrary error as a user error, keeping it as the source.
    #[track_caller]
    #[must_use]
    pub fn from_source<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut err = Self::with_kind(ErrorKind::User, source.to_string());
        if let Some(inner) = Arc::get_mut(&mut err.inner) {
            inner.source = Some(Arc::new(source));
        }
        err
    }

    /// Converts a caught panic payload.
    ///
    /// The panic site is unknown here, so the error has no origin snapshot;
    /// its trace starts at the frame that ran the panicking body.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with a non-string payload".to_string());
        Self {
            inner: Arc::new(Inner {
                kind: ErrorKind::Panicked,
                message,
                source: None,
                origin: None,
                trace: None,
            }),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Returns the snapshot taken where the error was raised, if tracing was on.
    #[must_use]
    pub fn origin(&self) -> Option<&Snapshot> {
        self.inner.origin.as_ref()
    }

    /// Returns the reconstructed cross-hop trace, once attached.
    #[must_use]
    pub fn trace(&self) -> Option<&Trace> {
        self.inner.trace.as_deref()
    }

    /// Returns true if this error came from a caught panic.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Panicked)
    }

    /// Renders the message followed by the reconstructed trace.
    #[must_use]
    pub fn report(&self) -> String {
        match self.trace() {
            Some(trace) => format!("{}\n{trace}", self.inner.message),
            None => self.inner.message.clone(),
        }
    }

    /// Attaches a trace reconstructed from `frame` unless one is present.
    #[must_use]
    pub(crate) fn traced(mut self, frame: &Frame) -> Self {
        if self.inner.trace.is_some() || !tracer::trace_enabled() {
            return self;
        }
        let trace = Trace::reconstruct(&self, frame);
        Arc::make_mut(&mut self.inner).trace = Some(Arc::new(trace));
        self
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.inner.kind)
            .field("message", &self.inner.message)
            .field("traced", &self.inner.trace.is_some())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner
            .source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_source(err)
    }
}

/// A violated framework invariant.
///
/// Faults are usage bugs, not runtime conditions. The aborting APIs raise
/// them with [`std::panic::panic_any`]; the `try_*` variants return them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Fault {
    /// `resolve` or `reject` called on a value that already settled.
    #[error("deferred value already settled")]
    AlreadySettled,
    /// A listener registered on a value that already settled.
    #[error("listener registered on a settled deferred value")]
    RegisterAfterSettle,
    /// `delay` used on a thread without an installed scheduler.
    #[error("no scheduler installed on this thread")]
    NoScheduler,
    /// A lifted slot was read before it settled.
    #[error("lifted slot read before it settled")]
    UnsettledSlot,
    /// A throttle was created with a zero limit.
    #[error("throttle limit must be positive")]
    ZeroLimit,
    /// A deferred value would settle to another deferred value.
    #[error("deferred value resolved with a deferred value")]
    NestedDeferred,
}

/// Logs and raises a framework fault.
#[track_caller]
pub(crate) fn raise(fault: Fault) -> ! {
    error!(fault = %fault, location = %Location::caller(), "framework fault");
    std::panic::panic_any(fault)
}

/// Re-raises `payload` if it carries a [`Fault`], otherwise hands it back.
pub(crate) fn resume_if_fault(payload: Box<dyn Any + Send>) -> Box<dyn Any + Send> {
    if payload.is::<Fault>() {
        std::panic::resume_unwind(payload);
    }
    payload
}

/// Error returned when loading configuration fails.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv {
        /// The variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file could not be parsed.
    #[cfg(feature = "config-file")]
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A specialized `Result` for values that settle with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
