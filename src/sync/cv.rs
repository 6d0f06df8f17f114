use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

/// How many times a waiter polls the flag before blocking on the OS
/// condvar. Workers prefer a short spin because wake-ups usually arrive
/// within the latency of a single task.
const SPIN: usize = 0x400;

/// Condition variable with edge-triggered notify semantics.
///
/// A `notify()` that arrives while nobody waits is not lost: the next
/// `wait()` consumes the pending flag and returns immediately. This closes
/// the publish-then-sleep race in the worker loop without requiring the
/// notifier and the waiter to share a lock around their state checks.
pub(crate) struct CondVar {
    notified: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl CondVar {
    pub(crate) fn new() -> Self {
        Self {
            notified: AtomicBool::new(false),
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    /// Wakes one pending (or future) `wait()`. Returns true when this call
    /// raised the flag, false when a previous notify was still pending.
    pub(crate) fn notify(&self) -> bool {
        if !self.notified.swap(true, Ordering::Release) {
            // Taking the lock orders this notify after a concurrent waiter's
            // final flag check, so the waiter is guaranteed to either see the
            // flag or be parked where notify_all can reach it.
            let _guard = self.lock.lock();
            self.cv.notify_all();
            true
        } else {
            false
        }
    }

    /// Blocks until a notify arrives (or consumes one that already did).
    pub(crate) fn wait(&self) {
        for _ in 0..SPIN {
            if self.notified.swap(false, Ordering::Acquire) {
                return;
            }
            std::hint::spin_loop();
        }

        let mut guard = self.lock.lock();
        while !self.notified.swap(false, Ordering::Acquire) {
            self.cv.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn pending_notify_is_consumed() {
        let cv = CondVar::new();
        assert!(cv.notify());
        assert!(!cv.notify());
        cv.wait(); // returns immediately, does not hang
        assert!(cv.notify());
    }

    #[test]
    fn cross_thread_wake() {
        let cv = Arc::new(CondVar::new());
        let notifier = {
            let cv = Arc::clone(&cv);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                cv.notify();
            })
        };
        cv.wait();
        notifier.join().unwrap();
    }
}
