//! Concurrency primitives shared by the client engine and the server registry.
//!
//! Two primitives, both intentionally small: a test-and-set [`SpinLock`] for the short,
//! low-contention critical sections around the read/write [`crate::message::MessageBuffer`]s
//! and the client registry, and a [`Semaphore`] with split `lock`/`consume` semantics that
//! lets a writer drain several buffered messages per wake instead of one notify per frame.

use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// A test-and-set spin lock. Appropriate only for short critical sections — everything
/// guarded by one here is a handful of pointer/length updates or a `memcpy`, never I/O.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        SpinLockGuard { lock: self }
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// A counting semaphore with non-standard but load-bearing semantics: `lock` blocks
/// until the count is greater than zero but does **not** decrement it; the caller must
/// call `consume` itself after it has actually processed a unit of work. This lets the
/// writer worker (see [`crate::client`]) wake once per `notify` yet drain every buffered
/// message in a single pass, consuming one tick per message it actually sends.
pub struct Semaphore {
    count: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Increments the count and wakes one waiter.
    pub fn notify(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.condvar.notify_one();
    }

    /// Blocks until the count is greater than zero. Does not decrement.
    pub fn wait(&self) {
        let guard = self.count.lock().unwrap();
        let _guard = self
            .condvar
            .wait_while(guard, |count| *count == 0)
            .unwrap();
    }

    /// Decrements the count if it is greater than zero; returns whether it did.
    pub fn consume(&self) -> bool {
        let mut count = self.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}
