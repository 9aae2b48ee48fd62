use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Single-fire broadcast used to tie a stream handler's lifetime to its
/// connection.
///
/// One clone is handed to the peer directory inside the outgoing
/// connection; the handler keeps another and blocks in [`wait`]. The peer
/// directory must fire the signal exactly once, when it rotates to a newer
/// connection for the same peer or declares this one dead. Waiting is
/// idempotent: after the signal fires, every wait returns immediately.
///
/// [`wait`]: CloseSignal::wait
#[derive(Clone)]
pub struct CloseSignal {
    inner: Arc<CloseInner>,
}

struct CloseInner {
    fired: Mutex<bool>,
    wakeup: Condvar,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CloseInner {
                fired: Mutex::new(false),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Fires the signal, waking every waiter. Returns `false` if the signal
    /// had already fired; callers are expected to fire at most once.
    pub fn fire(&self) -> bool {
        let mut fired = self.inner.fired.lock();
        if *fired {
            return false;
        }
        *fired = true;
        self.inner.wakeup.notify_all();
        true
    }

    pub fn is_fired(&self) -> bool {
        *self.inner.fired.lock()
    }

    /// Blocks until the signal fires. No busy polling; the thread parks on
    /// a condvar.
    pub fn wait(&self) {
        let mut fired = self.inner.fired.lock();
        while !*fired {
            self.inner.wakeup.wait(&mut fired);
        }
    }

    /// Blocks until the signal fires or `timeout` elapses. Returns whether
    /// the signal has fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self.inner.fired.lock();
        while !*fired {
            if self.inner.wakeup.wait_until(&mut fired, deadline).timed_out() {
                break;
            }
        }
        *fired
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}
