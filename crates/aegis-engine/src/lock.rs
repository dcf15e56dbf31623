//! The single policy lock and its holder discipline.
//!
//! All mutable policy state sits behind one [`PolicyLock`]. Read/merge/
//! mutate sequences run with it held and are atomic sections. Side effects
//! that can re-enter the engine (lifecycle notifications awaiting an
//! acknowledgment, store commits, uninstall flows) must run after release;
//! [`PolicyLock::assert_not_held`] makes a violation fail loudly instead of
//! deadlocking quietly later.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Hash of the current thread's id; `0` is reserved for "nobody".
fn current_thread_token() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() | 1
}

/// A mutex that remembers which thread holds it.
#[derive(Debug, Default)]
pub struct PolicyLock<T> {
    inner: Mutex<T>,
    holder: AtomicU64,
}

/// Guard for [`PolicyLock`]; clears the holder tag on drop.
pub struct PolicyGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    holder: &'a AtomicU64,
}

impl<T> PolicyLock<T> {
    /// Wraps `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            holder: AtomicU64::new(0),
        }
    }

    /// Acquires the lock. A poisoned lock is recovered rather than
    /// propagated; the in-memory state stays authoritative per the error
    /// policy.
    pub fn lock(&self) -> PolicyGuard<'_, T> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.holder.store(current_thread_token(), Ordering::Release);
        PolicyGuard {
            guard,
            holder: &self.holder,
        }
    }

    /// Returns `true` if the calling thread currently holds the lock.
    #[must_use]
    pub fn held_by_current_thread(&self) -> bool {
        self.holder.load(Ordering::Acquire) == current_thread_token()
    }

    /// Panics if the calling thread holds the lock.
    ///
    /// Placed at the top of every code path that dispatches re-entrant
    /// side effects.
    pub fn assert_not_held(&self) {
        assert!(
            !self.held_by_current_thread(),
            "policy lock held while dispatching a re-entrant side effect"
        );
    }
}

impl<T> std::ops::Deref for PolicyGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for PolicyGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for PolicyGuard<'_, T> {
    fn drop(&mut self) {
        self.holder.store(0, Ordering::Release);
    }
}
