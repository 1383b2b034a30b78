//! E2E: callback-style functions driven by the event loop, adapted and
//! unadapted through the thread's default bridge.

#[macro_use]
mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use common::*;
use tasync::time::{self, Time};
use tasync::{Callback, CallbackFn, DeferredFn, Error, Eventual, Outcome, adapt, invoke, ready, unadapt};

/// A callback-style lookup that answers after `key` milliseconds.
fn slow_lookup() -> CallbackFn<u32, String> {
    Rc::new(|key: u32, done: Callback<String>| {
        let scheduler = time::current().expect("loop installed");
        scheduler.schedule(
            Duration::from_millis(u64::from(key)),
            Box::new(move || {
                if key == 0 {
                    done(Err(Error::user("no such key")));
                } else {
                    done(Ok(format!("value-{key}")));
                }
            }),
        );
    })
}

#[test]
fn e2e_adapted_function_settles_on_the_loop() {
    init_test("e2e_adapted_function_settles_on_the_loop");
    let (event_loop, _guard) = virtual_loop();
    let lookup = adapt(&slow_lookup());

    test_section!("Pending until the callback fires");
    let Ok(Eventual::Later(found)) = lookup(40) else {
        panic!("expected a pending result");
    };
    assert!(found.is_pending());
    event_loop.run();
    assert_eq!(event_loop.now(), Time::from_millis(40));
    assert_resolved!(found, "value-40".to_string());

    test_section!("Callback errors reject");
    let Ok(Eventual::Later(missing)) = lookup(0) else {
        panic!("expected a pending result");
    };
    event_loop.run();
    let error = assert_rejected!(missing);
    assert_eq!(error.message(), "no such key");
    test_complete!("e2e_adapted_function");
}

#[test]
fn e2e_adapted_function_composes_with_invoke() {
    init_test("e2e_adapted_function_composes_with_invoke");
    let (event_loop, _guard) = virtual_loop();
    let lookup = adapt(&slow_lookup());
    let first = lookup(10);
    let second = lookup(30);
    let joined = invoke(|a: String, b: String| ready(format!("{a}+{b}")), (first, second))
        .expect("pending")
        .into_deferred();
    event_loop.run();
    assert_resolved!(joined, "value-10+value-30".to_string());
    test_complete!("e2e_adapt_invoke");
}

#[test]
fn e2e_roundtrip_returns_the_original_functions() {
    init_test("e2e_roundtrip_returns_the_original_functions");
    let source = slow_lookup();
    let adapted = adapt(&source);
    assert!(Rc::ptr_eq(&adapt(&source), &adapted));
    assert!(Rc::ptr_eq(&unadapt(&adapted), &source));

    let plain: DeferredFn<u32, String> = Rc::new(|key: u32| -> Outcome<String> { ready(key.to_string()) });
    let unadapted = unadapt(&plain);
    assert!(Rc::ptr_eq(&unadapt(&plain), &unadapted));
    assert!(Rc::ptr_eq(&adapt(&unadapted), &plain));
    test_complete!("e2e_roundtrip");
}

#[test]
fn e2e_unadapted_function_reports_late_settlement() {
    init_test("e2e_unadapted_function_reports_late_settlement");
    let (event_loop, _guard) = virtual_loop();
    let delayed: DeferredFn<u32, u32> =
        Rc::new(|ms: u32| -> Outcome<u32> { Ok(time::delay(i64::from(ms), ms * 2)) });
    let callback_style = unadapt(&delayed);

    let seen = Rc::new(RefCell::new(Vec::new()));
    for ms in [30, 10, 20] {
        let sink = Rc::clone(&seen);
        callback_style(
            ms,
            Box::new(move |result: Result<u32, Error>| {
                sink.borrow_mut().push(result.expect("delay resolves"));
            }),
        );
    }
    assert!(seen.borrow().is_empty());
    event_loop.run();
    assert_eq!(*seen.borrow(), vec![20, 40, 60]);
    test_complete!("e2e_unadapt_late");
}
