use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::Error;

use super::{Deferred, Listener};

/// Future returned by awaiting a [`Deferred`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Wait<T> {
    deferred: Deferred<T>,
    waker: Rc<RefCell<Option<Waker>>>,
    subscribed: bool,
}

struct WakeOnSettle(Rc<RefCell<Option<Waker>>>);

impl WakeOnSettle {
    fn wake(&self) {
        if let Some(waker) = self.0.borrow_mut().take() {
            waker.wake();
        }
    }
}

impl<T> Listener<T> for WakeOnSettle {
    fn on_resolved(self: Box<Self>, _value: &T) {
        self.wake();
    }

    fn on_rejected(self: Box<Self>, _error: &Error) {
        self.wake();
    }
}

impl<T: Clone + 'static> Future for Wait<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.deferred.outcome() {
            return Poll::Ready(outcome);
        }
        *self.waker.borrow_mut() = Some(cx.waker().clone());
        if !self.subscribed {
            self.subscribed = true;
            let listener = WakeOnSettle(Rc::clone(&self.waker));
            self.deferred.register(Box::new(listener));
        }
        Poll::Pending
    }
}

impl<T: Clone + 'static> IntoFuture for Deferred<T> {
    type Output = Result<T, Error>;
    type IntoFuture = Wait<T>;

    fn into_future(self) -> Self::IntoFuture {
        Wait {
            deferred: self,
            waker: Rc::new(RefCell::new(None)),
            subscribed: false,
        }
    }
}
