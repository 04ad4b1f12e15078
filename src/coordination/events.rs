use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use futures::unsync::oneshot;
use futures::Future;

use client::StaticBoxFuture;
use errors::ErrorKind;

/// A level-triggered, clearable signal for the event loop.
///
/// `wait` resolves immediately while the signal is set, otherwise when it
/// next becomes set; dropping the returned future cancels the wait.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Rc<RefCell<SignalState>>,
}

#[derive(Default)]
struct SignalState {
    set: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

impl Signal {
    pub fn new() -> Signal {
        Signal::default()
    }

    pub fn is_set(&self) -> bool {
        self.inner.borrow().set
    }

    pub fn set(&self) {
        let waiters = {
            let mut state = self.inner.borrow_mut();
            state.set = true;
            mem::replace(&mut state.waiters, Vec::new())
        };

        for waiter in waiters {
            drop(waiter.send(()));
        }
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().set = false;
    }

    pub fn wait(&self) -> StaticBoxFuture<()> {
        let mut state = self.inner.borrow_mut();

        if state.set {
            return StaticBoxFuture::ok(());
        }

        let (sender, receiver) = oneshot::channel();
        state.waiters.push(sender);

        StaticBoxFuture::new(receiver
                                 .map_err(|_| {
                                              ErrorKind::Canceled("signal dropped before set")
                                                  .into()
                                          }))
    }
}
