//! Process-wide shutdown coordination.
//!
//! A single boolean flag, set by signal reception or a `shutdown` refresh
//! frame, that every blocking primitive in the system consults at its wake
//! condition. Cancellation is cooperative; nothing is forcibly killed.
//!
//! Teardown ordering (driven by the binary once [`ShutdownFlag::wait`]
//! returns):
//!
//! 1. the flag is set,
//! 2. every live stream session is stopped and drained,
//! 3. the refresh controller observes the flag and exits,
//! 4. the FUSE session is dropped, unmounting the tree,
//! 5. remaining workers are joined.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct Inner {
    flag: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

/// Cloneable handle to the process-wide shutdown flag.
#[derive(Clone)]
pub struct ShutdownFlag {
    inner: Arc<Inner>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                lock: Mutex::new(()),
                cond: Condvar::new(),
            }),
        }
    }

    /// True once shutdown has been requested.
    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Request shutdown and wake every waiter. Idempotent.
    pub fn trigger(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock().unwrap();
        self.inner.cond.notify_all();
    }

    /// Sleep for up to `dur`, returning early when shutdown fires.
    ///
    /// Returns true when shutdown has been requested.
    pub fn wait_timeout(&self, dur: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        let guard = self.inner.lock.lock().unwrap();
        let (_guard, _result) = self
            .inner
            .cond
            .wait_timeout_while(guard, dur, |_| !self.is_set())
            .unwrap();
        self.is_set()
    }

    /// Block until shutdown is requested.
    pub fn wait(&self) {
        let guard = self.inner.lock.lock().unwrap();
        let _guard = self
            .inner
            .cond
            .wait_while(guard, |_| !self.is_set())
            .unwrap();
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the process-wide flag and the first two teardown steps; the
/// binary finishes the sequence (controller join, unmount, worker joins).
pub struct ShutdownCoordinator {
    flag: ShutdownFlag,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            flag: ShutdownFlag::new(),
        }
    }

    /// Cloneable flag handed to every component.
    pub fn flag(&self) -> ShutdownFlag {
        self.flag.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.flag.is_set()
    }

    /// Block until shutdown is requested from anywhere.
    pub fn wait(&self) {
        self.flag.wait();
    }

    /// Assert the flag, then stop and drain every live stream session.
    pub fn drain(&self, catalog: &crate::catalog::Catalog) {
        self.flag.trigger();
        catalog.stop_all_sessions();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn starts_unset() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
    }

    #[test]
    fn trigger_is_idempotent() {
        let flag = ShutdownFlag::new();
        flag.trigger();
        flag.trigger();
        assert!(flag.is_set());
    }

    #[test]
    fn wait_timeout_expires_when_unset() {
        let flag = ShutdownFlag::new();
        let start = Instant::now();
        assert!(!flag.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_timeout_returns_immediately_when_set() {
        let flag = ShutdownFlag::new();
        flag.trigger();
        let start = Instant::now();
        assert!(flag.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn coordinator_drain_asserts_the_flag() {
        let coordinator = ShutdownCoordinator::new();
        let flag = coordinator.flag();
        let catalog = crate::catalog::Catalog::new(Default::default());
        coordinator.drain(&catalog);
        assert!(coordinator.is_shutting_down());
        assert!(flag.is_set());
    }

    #[test]
    fn trigger_wakes_blocked_waiter() {
        let flag = ShutdownFlag::new();
        let waiter = {
            let flag = flag.clone();
            thread::spawn(move || flag.wait_timeout(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        flag.trigger();
        assert!(waiter.join().unwrap());
    }
}
