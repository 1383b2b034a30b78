//! E2E: invocation over delayed arguments, rejection traces, `then`,
//! `trycatch` and configuration.

#[macro_use]
mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use common::*;
use tasync::time::{Time, delay};
use tasync::{
    Config, Deferred, Error, ErrorKind, Eventual, Outcome, TraceConfig, invoke, invoke_on, ready,
    set_trace_enabled, then, trycatch,
};

fn divide(x: i32, y: i32) -> Outcome<i32> {
    if y == 0 {
        return Err(Error::user("divide by zero"));
    }
    ready(x / y)
}

fn compute() -> Outcome<i32> {
    invoke(divide, (delay(100, 10), delay(50, 0)))
}

// =========================================================================
// Delayed division: rejection after the slowest argument, traced
// =========================================================================

#[test]
fn e2e_divide_by_zero_rejects_with_cross_hop_trace() {
    init_test("e2e_divide_by_zero_rejects_with_cross_hop_trace");
    let _settings = TRACE_SETTINGS.lock();
    let (event_loop, _guard) = virtual_loop();

    test_section!("Invoke over pending arguments");
    let result = invoke(compute, ()).expect("arguments are pending").into_deferred();
    assert!(result.is_pending());

    test_section!("Settles with the slowest argument");
    event_loop.run_until(Time::from_millis(99));
    assert!(result.is_pending());
    event_loop.run();
    assert_eq!(event_loop.now(), Time::from_millis(100));

    let error = assert_rejected!(result);
    assert_eq!(error.kind(), ErrorKind::User);
    assert_eq!(error.message(), "divide by zero");

    test_section!("Trace covers divide and its caller");
    let trace = error.trace().expect("tracing is enabled");
    assert!(trace.mentions("divide"), "{trace}");
    assert!(trace.mentions("compute"), "{trace}");
    assert_eq!(trace.hops(), 2);
    let report = error.report();
    assert!(report.starts_with("divide by zero\n"));
    assert_eq!(report.matches("*** tasync ***").count(), 2, "{report}");
    test_complete!("e2e_divide_by_zero", hops = trace.hops());
}

#[test]
fn e2e_divide_resolves_when_divisor_is_nonzero() {
    init_test("e2e_divide_resolves_when_divisor_is_nonzero");
    let (event_loop, _guard) = virtual_loop();

    let result = invoke(divide, (delay(30, 12), delay(10, 4)))
        .expect("arguments are pending")
        .into_deferred();
    assert_eq!(event_loop.run(), 2);
    assert_resolved!(result, 3);
    test_complete!("e2e_divide_resolves");
}

#[test]
fn e2e_trace_disabled_leaves_errors_bare() {
    init_test("e2e_trace_disabled_leaves_errors_bare");
    let _settings = TRACE_SETTINGS.lock();
    let (event_loop, _guard) = virtual_loop();

    set_trace_enabled(false);
    let result = invoke(compute, ()).expect("arguments are pending").into_deferred();
    event_loop.run();
    set_trace_enabled(true);

    let error = assert_rejected!(result);
    assert!(error.trace().is_none());
    assert_eq!(error.report(), "divide by zero");
    test_complete!("e2e_trace_disabled");
}

#[test]
fn e2e_max_hops_summarizes_outer_frames() {
    init_test("e2e_max_hops_summarizes_outer_frames");
    let _settings = TRACE_SETTINGS.lock();
    let (event_loop, _guard) = virtual_loop();

    Config {
        trace: TraceConfig {
            max_hops: Some(1),
            ..TraceConfig::default()
        },
    }
    .install();
    let result = invoke(compute, ()).expect("arguments are pending").into_deferred();
    event_loop.run();
    Config::default().install();

    let error = assert_rejected!(result);
    let trace = error.trace().expect("tracing is enabled");
    assert_eq!(trace.hops(), 1);
    assert_eq!(trace.omitted_hops(), 1);
    assert!(trace.to_string().ends_with("    ... 1 more hops\n"), "{trace}");
    let json = trace.to_json().expect("serializable");
    assert!(json.contains("\"omitted_hops\": 1"));
    test_complete!("e2e_max_hops");
}

// =========================================================================
// then: synchronous delivery for ready values
// =========================================================================

#[test]
fn e2e_then_on_ready_value_is_synchronous() {
    init_test("e2e_then_on_ready_value_is_synchronous");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    then(Eventual::Now(5), move |r: Result<i32, Error>| {
        sink.borrow_mut().push(r.expect("ready"));
    });
    seen.borrow_mut().push(-1);
    assert_eq!(*seen.borrow(), vec![5, -1]);
    test_complete!("e2e_then_sync");
}

#[test]
fn e2e_then_on_pending_value_waits() {
    init_test("e2e_then_on_pending_value_waits");
    let (event_loop, _guard) = virtual_loop();
    let seen = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&seen);
    then(delay(20, "late"), move |r: Result<&'static str, Error>| {
        *sink.borrow_mut() = Some(r.expect("resolves"));
    });
    assert!(seen.borrow().is_none());
    event_loop.advance(Duration::from_millis(20));
    assert_eq!(*seen.borrow(), Some("late"));
    test_complete!("e2e_then_async");
}

// =========================================================================
// trycatch and invoke_on
// =========================================================================

#[test]
fn e2e_trycatch_recovers_from_late_failure() {
    init_test("e2e_trycatch_recovers_from_late_failure");
    let (event_loop, _guard) = virtual_loop();
    let result = trycatch(compute, |error: Error| -> Outcome<i32> {
        assert_eq!(error.message(), "divide by zero");
        ready(-1)
    })
    .expect("body is pending")
    .into_deferred();
    event_loop.run();
    assert_resolved!(result, -1);
    test_complete!("e2e_trycatch");
}

struct Account {
    balance: i64,
}

impl Account {
    fn deposit(self, (amount,): (i64,)) -> Outcome<i64> {
        ready(self.balance + amount)
    }
}

#[test]
fn e2e_invoke_on_passes_the_receiver() {
    init_test("e2e_invoke_on_passes_the_receiver");
    let (event_loop, _guard) = virtual_loop();
    let account = Account { balance: 100 };
    let result = invoke_on(account, Account::deposit, (delay(5, 25_i64),))
        .expect("argument is pending")
        .into_deferred();
    event_loop.run();
    assert_resolved!(result, 125);
    test_complete!("e2e_invoke_on");
}

#[test]
fn e2e_chained_invocations_flatten() {
    init_test("e2e_chained_invocations_flatten");
    let (event_loop, _guard) = virtual_loop();
    let doubled = invoke(|x: i32| ready(x * 2), (delay(10, 4),)).expect("pending");
    let plus_one = invoke(|x: i32| delay(10, x + 1), (doubled,))
        .expect("pending")
        .into_deferred();
    let chained: Deferred<i32> = plus_one.clone();
    event_loop.run();
    assert_resolved!(chained, 9);
    assert_eq!(event_loop.now(), Time::from_millis(20));
    test_complete!("e2e_chained");
}
