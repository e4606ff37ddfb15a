use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A promise-like handle for a value produced on another thread.
///
/// Every `Pending` resolves: the producing side either completes it explicitly
/// or, when dropped without completing (queue shut down, job abandoned), the
/// fallback supplied at construction resolves it instead. `wait()` therefore
/// never hangs.
pub struct Pending<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    // `None` until resolved.
    value: Mutex<Option<T>>,
    cond: Condvar,
}

/// Producer side of a [`Pending`].
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
    fallback: Option<T>,
}

/// Creates a connected handle/completer pair.
///
/// `fallback` resolves the handle if the completer is dropped without
/// completing.
pub fn channel<T>(fallback: T) -> (Pending<T>, Completer<T>) {
    let shared = Arc::new(Shared {
        value: Mutex::new(None),
        cond: Condvar::new(),
    });
    (
        Pending { shared: Arc::clone(&shared) },
        Completer { shared, fallback: Some(fallback) },
    )
}

impl<T> Pending<T> {
    /// An already-resolved handle.
    pub fn ready(value: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                value: Mutex::new(Some(value)),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.shared.value.lock().is_some()
    }

    /// Blocks until the value is available and takes it.
    pub fn wait(self) -> T {
        let mut guard = self.shared.value.lock();
        while guard.is_none() {
            self.shared.cond.wait(&mut guard);
        }
        guard.take().expect("resolved pending holds a value")
    }

    /// Blocks up to `timeout`; returns the handle back on expiry so the caller
    /// can keep waiting.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, Self> {
        let shared = Arc::clone(&self.shared);
        let deadline = Instant::now() + timeout;

        let mut guard = shared.value.lock();
        while guard.is_none() {
            if shared.cond.wait_until(&mut guard, deadline).timed_out() && guard.is_none() {
                drop(guard);
                return Err(self);
            }
        }
        Ok(guard.take().expect("resolved pending holds a value"))
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").field("ready", &self.is_ready()).finish()
    }
}

impl<T> Completer<T> {
    /// Resolves the handle and wakes all waiters.
    pub fn complete(mut self, value: T) {
        self.fallback = None;
        resolve(&self.shared, value);
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        // Abandoned without completing: resolve with the fallback so the
        // consumer side can never hang.
        if let Some(fallback) = self.fallback.take() {
            resolve(&self.shared, fallback);
        }
    }
}

fn resolve<T>(shared: &Shared<T>, value: T) {
    let mut guard = shared.value.lock();
    if guard.is_none() {
        *guard = Some(value);
        shared.cond.notify_all();
    }
}
