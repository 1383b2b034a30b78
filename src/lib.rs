//! tasync: deferred values with cross-hop traces for callback-driven code.
//!
//! # Overview
//!
//! tasync lets single-threaded, callback-driven code treat values that are not
//! available yet as if they were ordinary values. Functions are invoked with
//! pending arguments, sequences of mixed pending and ready values are waited
//! on together, and callback-style APIs convert to and from deferred-returning
//! ones. When something fails, the error carries one trace stitched across
//! every asynchronous hop it travelled through.
//!
//! ```
//! use tasync::{invoke, ready};
//! use tasync::test_utils::virtual_loop;
//! use tasync::time::delay;
//!
//! let (event_loop, _guard) = virtual_loop();
//! let sum = invoke(|a: i32, b: i32| ready(a + b), (delay(100, 2), delay(50, 3)))
//!     .expect("arguments are pending")
//!     .into_deferred();
//! event_loop.run();
//! assert_eq!(sum.value(), Some(5));
//! ```
//!
//! # Module Structure
//!
//! - [`deferred`]: The [`Deferred`] state machine and the [`Eventual`] sum type
//! - [`frame`]: The thread-local call-frame tree
//! - [`lift`](mod@lift): Waiting on sequences of possibly pending values
//! - [`invoke`](mod@invoke): Invocation over pending arguments, `then`, `trycatch`
//! - [`bridge`]: Converting between callback and deferred APIs
//! - [`throttle`](mod@throttle): Bounding in-flight calls
//! - [`tracer`]: Snapshot capture and cross-hop trace reconstruction
//! - [`time`]: The scheduler seam, `delay` and a timer event loop
//! - [`config`]: Trace configuration from defaults, environment and TOML
//! - [`error`](mod@error): Error types
//! - [`tracing_compat`]: Optional tracing integration (requires `tracing-integration` feature)
//!
//! # Threading
//!
//! Everything except the trace settings is thread-local. Deferred values,
//! frames and bridge wrappers are `!Send`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod bridge;
pub mod config;
pub mod deferred;
pub mod error;
pub mod frame;
pub mod invoke;
pub mod lift;
pub mod throttle;
pub mod time;
pub mod tracer;
pub mod tracing_compat;

#[cfg(feature = "test-internals")]
pub mod test_utils;

pub use bridge::{Bridge, Callback, CallbackFn, DeferredFn, adapt, unadapt};
pub use config::{Config, TraceConfig};
pub use deferred::{Deferred, Eventual, Listener, Outcome, Status, Wait, ready};
pub use error::{ConfigError, Error, ErrorKind, Fault, Result};
pub use frame::{Frame, FrameGuard};
pub use invoke::{IntoOutcome, Invocable, invoke, invoke_on, then, trycatch};
pub use lift::{Arg, Liftable, Pending, Step, lift};
pub use throttle::{Throttle, throttle};
pub use time::delay;
pub use tracer::{Trace, set_trace_enabled, trace_enabled};
