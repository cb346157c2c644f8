//! Cooperative cancellation for backend threads.
//!
//! A [`CancelToken`] is cheap to clone; all clones observe the same signal.
//! Unlike `thread::sleep()`, waits on a token return as soon as it is
//! cancelled, which keeps teardown within one tick of the request.
//!
//! Child tokens are cancelled with their parent but can also be cancelled on
//! their own; a backend session uses one child per connection so that helper
//! threads (I/O pump, scan loop) stop with the session without touching the
//! caller's token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

struct Inner {
    cancelled: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new(cancelled: bool) -> Self {
        Self {
            cancelled: AtomicBool::new(cancelled),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            // Taking the lock orders the store before any waiter re-checks.
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }

        let children = match self.children.lock() {
            Ok(mut children) => std::mem::take(&mut *children),
            Err(_) => Vec::new(),
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// A cancellation signal that supports interruptible waits.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a new token in the non-cancelled state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new(false)),
        }
    }

    /// Create a token that is cancelled together with `self`.
    pub fn child(&self) -> Self {
        let child = Arc::new(Inner::new(self.is_cancelled()));
        if let Ok(mut children) = self.inner.children.lock() {
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        // Parent may have been cancelled between the check and the push.
        if self.is_cancelled() {
            child.cancel();
        }
        Self { inner: child }
    }

    /// Trigger the signal, waking all waiting threads and children.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait for the specified duration or until cancelled.
    ///
    /// Returns `true` if cancelled, `false` if the wait completed normally.
    pub fn wait(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }

        let Ok(guard) = self.inner.mutex.lock() else {
            // Mutex poisoned, treat as cancelled
            return true;
        };
        let result = self
            .inner
            .condvar
            .wait_timeout_while(guard, duration, |_| !self.is_cancelled());

        match result {
            Ok((_, timeout_result)) => !timeout_result.timed_out() || self.is_cancelled(),
            Err(_) => true,
        }
    }

    /// Wait until `deadline` or until cancelled.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        self.wait(deadline.saturating_duration_since(Instant::now()))
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
