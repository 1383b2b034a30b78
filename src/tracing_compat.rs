//! Optional tracing integration.
//!
//! With the `tracing-integration` feature the logging macros are the ones from
//! the `tracing` crate. Without it they expand to nothing, so instrumented code
//! costs nothing in builds that do not want structured logging.
//!
//! Crate modules import the macros from here rather than from `tracing`:
//!
//! ```ignore
//! use crate::tracing_compat::{debug, trace};
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __tasync_log_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing-integration"))]
pub use crate::__tasync_log_noop as debug;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__tasync_log_noop as error;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__tasync_log_noop as info;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__tasync_log_noop as trace;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__tasync_log_noop as warn;
