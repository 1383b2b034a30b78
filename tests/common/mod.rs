#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

pub use tasync::test_utils::{init_test_logging, virtual_loop};
pub use tasync::{assert_rejected, assert_resolved, assert_with_log, test_complete, test_phase, test_section};

use proptest::prelude::ProptestConfig;

/// Serializes tests that toggle the process-wide trace settings.
pub static TRACE_SETTINGS: parking_lot::Mutex<()> = parking_lot::const_mutex(());

/// Initializes logging and announces the test.
pub fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

/// Proptest configuration with a fixed case count and no persisted failures.
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    ProptestConfig {
        cases,
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}
