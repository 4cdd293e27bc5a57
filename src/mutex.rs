//! A cooperative mutex: contention suspends the calling task rather than parking the whole
//! worker thread (spec §5 "Shared-resource policy"). Built on `std::sync::Mutex`'s own
//! non-blocking `try_lock` plus an `mio::Waker`-based notification side channel, so callers never
//! block an OS thread waiting for the lock — they retry after their worker is woken.
//!
//! Guidance from spec §5: prefer session-scoped mutexes over server-wide ones, which are a DoS
//! vector under this model (one slow holder stalls every worker waiting on it).

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::sync::Arc;

/// A mutex whose contention path suspends cooperatively. See the module docs for the intended
/// usage pattern: call [`CooperativeMutex::try_lock`] from within a task; on `None`, the task
/// should suspend (the same way it would for a would-block I/O result) and retry once its
/// worker's waker fires.
pub struct CooperativeMutex<T> {
    inner: Mutex<T>,
    waiters: Mutex<Vec<Arc<mio::Waker>>>,
}

impl<T> CooperativeMutex<T> {
    /// Wraps `value` behind a fresh, unlocked mutex.
    pub fn new(value: T) -> Self {
        CooperativeMutex {
            inner: Mutex::new(value),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Attempts to acquire the lock without blocking. On contention, registers `waker` so its
    /// worker gets woken the next time the lock is released, and returns `None` — the caller's
    /// suspension signal.
    pub fn try_lock(&self, waker: &Arc<mio::Waker>) -> Option<CooperativeGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(CooperativeGuard {
                guard,
                waiters: &self.waiters,
            }),
            Err(TryLockError::WouldBlock) => {
                self.register_waiter(waker);
                None
            }
            Err(TryLockError::Poisoned(poisoned)) => Some(CooperativeGuard {
                guard: poisoned.into_inner(),
                waiters: &self.waiters,
            }),
        }
    }

    fn register_waiter(&self, waker: &Arc<mio::Waker>) {
        let mut waiters = lock_ignoring_poison(&self.waiters);
        if !waiters.iter().any(|w| Arc::ptr_eq(w, waker)) {
            waiters.push(Arc::clone(waker));
        }
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The held lock. Waking every registered waiter happens on drop, so holding this across a long
/// handler body delays every contender equally — another reason to keep the guarded critical
/// section short.
pub struct CooperativeGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    waiters: &'a Mutex<Vec<Arc<mio::Waker>>>,
}

impl<T> Deref for CooperativeGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for CooperativeGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for CooperativeGuard<'_, T> {
    fn drop(&mut self) {
        for waker in lock_ignoring_poison(self.waiters).drain(..) {
            let _ = waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    fn dummy_waker() -> Arc<mio::Waker> {
        let poll = mio::Poll::new().unwrap();
        Arc::new(mio::Waker::new(poll.registry(), mio::Token(0)).unwrap())
    }

    #[test]
    fn try_lock_succeeds_when_uncontended() {
        let mutex = CooperativeMutex::new(42);
        let waker = dummy_waker();
        let guard = mutex.try_lock(&waker).unwrap();
        assert_eq!(42, *guard);
    }

    #[test]
    fn try_lock_reports_contention_instead_of_blocking() {
        let mutex = CooperativeMutex::new(0);
        let waker = dummy_waker();
        let _held = mutex.try_lock(&waker).unwrap();
        assert!(mutex.try_lock(&waker).is_none());
    }

    #[test]
    fn releasing_the_guard_wakes_registered_waiters() {
        let mutex = CooperativeMutex::new(0);
        let waker = dummy_waker();
        {
            let held = mutex.try_lock(&waker).unwrap();
            assert!(mutex.try_lock(&waker).is_none());
            drop(held);
        }
        // A second waker attempting after release should succeed outright.
        let guard = mutex.try_lock(&waker);
        assert!(guard.is_some());
    }

    #[test]
    fn waker_wake_does_not_error_after_registration() {
        let mutex = CooperativeMutex::new(0);
        let waker = dummy_waker();
        let held = mutex.try_lock(&waker).unwrap();
        assert!(mutex.try_lock(&waker).is_none());
        drop(held);
        // Waking an already-dropped Poll-backed waker from the test still succeeds or at worst
        // returns a benign io error; either way the mutex itself must not panic.
        let result = waker.wake();
        assert!(result.is_ok() || result.unwrap_err().kind() == ErrorKind::Other);
    }
}
