//! Test utilities for tasync.
//!
//! This module provides shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A virtual-time event loop installed as the thread's scheduler
//!
//! # Example
//! ```
//! use tasync::test_utils::{init_test_logging, virtual_loop};
//! use tasync::time::delay;
//!
//! init_test_logging();
//! let (event_loop, _guard) = virtual_loop();
//! let later = delay(10, 1).into_deferred();
//! event_loop.run();
//! assert_eq!(later.value(), Some(1));
//! ```

use std::rc::Rc;
use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::time::{EventLoop, SchedulerGuard};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// `RUST_LOG` overrides the level. Safe to call multiple times; only
/// initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom default level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Creates a virtual-time event loop and installs it as the thread's
/// scheduler until the guard is dropped.
#[must_use]
pub fn virtual_loop() -> (Rc<EventLoop>, SchedulerGuard) {
    let event_loop = Rc::new(EventLoop::virtual_time());
    let guard = event_loop.install();
    (event_loop, guard)
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that a deferred value resolved to `expected`.
#[macro_export]
macro_rules! assert_resolved {
    ($deferred:expr, $expected:expr) => {
        match $deferred.outcome() {
            Some(Ok(v)) => assert_eq!(v, $expected),
            other => unreachable!("expected resolution to {:?}, got {:?}", $expected, other),
        }
    };
}

/// Assert that a deferred value rejected.
#[macro_export]
macro_rules! assert_rejected {
    ($deferred:expr) => {
        match $deferred.outcome() {
            Some(Err(e)) => e,
            other => unreachable!("expected rejection, got {:?}", other),
        }
    };
}
