//! E2E: self-recursive asynchronous loops thousands of hops deep.

#[macro_use]
mod common;

use common::*;
use tasync::test_utils::init_test_logging_with_level;
use tasync::time::delay;
use tasync::{Config, Error, Outcome, TraceConfig, invoke, ready};

const DEPTH: u32 = 10_000;

/// Counts down one event-loop turn per step, each step a fresh invocation.
fn countdown(n: u32) -> Outcome<u32> {
    if n == 0 {
        return ready(0);
    }
    invoke(countdown, (delay(0, n - 1),))
}

fn fail_at_bottom(n: u32) -> Outcome<u32> {
    if n == 0 {
        return Err(Error::user("bottom"));
    }
    invoke(fail_at_bottom, (delay(0, n - 1),))
}

fn init_deep_test(name: &str) {
    // Trace-level events walk the frame path on every hop.
    init_test_logging_with_level(tracing::Level::INFO);
    test_phase!(name);
}

#[test]
fn e2e_deep_resolution_settles_every_hop() {
    init_deep_test("e2e_deep_resolution_settles_every_hop");
    let _settings = TRACE_SETTINGS.lock();
    let (event_loop, _guard) = virtual_loop();

    test_section!("Run the countdown");
    let result = invoke(countdown, (delay(0, DEPTH),))
        .expect("first argument is pending")
        .into_deferred();
    let turns = event_loop.run();

    assert_with_log!(
        turns == DEPTH as usize + 1,
        "one timer per step",
        DEPTH as usize + 1,
        turns
    );
    assert_resolved!(result, 0);
    test_complete!("e2e_deep_resolution", depth = DEPTH);
}

#[test]
fn e2e_deep_rejection_keeps_its_trace() {
    init_deep_test("e2e_deep_rejection_keeps_its_trace");
    let _settings = TRACE_SETTINGS.lock();
    let (event_loop, _guard) = virtual_loop();
    Config {
        trace: TraceConfig {
            max_hops: Some(8),
            ..TraceConfig::default()
        },
    }
    .install();

    test_section!("Fail at the bottom");
    let result = invoke(fail_at_bottom, (delay(0, DEPTH),))
        .expect("first argument is pending")
        .into_deferred();
    event_loop.run();
    Config::default().install();

    let error = assert_rejected!(result);
    assert_eq!(error.message(), "bottom");
    let trace = error.trace().expect("trace attached");
    assert_eq!(trace.hops(), 8);
    assert_with_log!(
        trace.hops() + trace.omitted_hops() == DEPTH as usize + 1,
        "every invocation is a hop",
        DEPTH as usize + 1,
        trace.hops() + trace.omitted_hops()
    );
    assert!(trace.mentions("fail_at_bottom"));
    test_complete!("e2e_deep_rejection", depth = DEPTH);
}
