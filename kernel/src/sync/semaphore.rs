//! A counting semaphore combined with the resource it protects.
//!
//! [`Semaphore::wait`] blocks (sleeps, not spins) the calling thread until a
//! permit is available and returns a [`SemaphorePermits`] guard; the permit
//! is returned to the pool automatically when the guard is dropped, or
//! explicitly via [`Semaphore::signal`] for event-style zero-initialized use.
//!
//! This is the primitive behind the buffer cache's sharing semaphore, which
//! hands out sixteen read/write permits per sector and reserves all sixteen
//! for a thread that needs to evict the sector exclusively.

use crate::{sync::SpinLock, thread::ParkHandle};
use alloc::collections::vec_deque::VecDeque;
use core::ops::Deref;

struct Inner {
    permits: usize,
    waiters: VecDeque<ParkHandle>,
}

/// Counting semaphore combined with the resource it guards.
pub struct Semaphore<T> {
    resource: T,
    inner: SpinLock<Inner>,
}

unsafe impl<T: Send> Send for Semaphore<T> {}
unsafe impl<T: Send> Sync for Semaphore<T> {}

impl<T> Semaphore<T> {
    /// Creates a new semaphore initialized with `permits` available permits.
    pub const fn new(permits: usize, resource: T) -> Self {
        Self {
            resource,
            inner: SpinLock::new(Inner {
                permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Waits until a permit becomes available and then acquires it.
    pub fn wait(&self) -> SemaphorePermits<'_, T> {
        loop {
            let mut inner = self.inner.lock();
            if inner.permits > 0 {
                inner.permits -= 1;
                inner.unlock();
                return SemaphorePermits { sema: self };
            }
            // The closure runs with interrupts still disabled (we hold
            // `inner`); it must unlock before returning so that
            // `park_with`'s post-condition (interrupts on) holds.
            crate::thread::Current::park_with(|park_handle| {
                inner.waiters.push_back(park_handle);
                inner.unlock();
            });
        }
    }

    /// Attempts to acquire a permit without blocking.
    pub fn try_wait(&self) -> Option<SemaphorePermits<'_, T>> {
        let mut inner = self.inner.lock();
        if inner.permits > 0 {
            inner.permits -= 1;
            inner.unlock();
            Some(SemaphorePermits { sema: self })
        } else {
            inner.unlock();
            None
        }
    }

    /// Releases a permit back to the semaphore, waking one waiter if any.
    pub fn signal(&self) {
        let mut inner = self.inner.lock();
        inner.permits += 1;
        let waiter = inner.waiters.pop_front();
        inner.unlock();
        if let Some(waiter) = waiter {
            waiter.unpark();
        }
    }

    /// Number of permits currently available.
    pub fn available(&self) -> usize {
        let inner = self.inner.lock();
        let n = inner.permits;
        inner.unlock();
        n
    }
}

/// An RAII guard that releases a permit back to its [`Semaphore`] on drop.
pub struct SemaphorePermits<'a, T> {
    sema: &'a Semaphore<T>,
}

impl<T> Deref for SemaphorePermits<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.sema.resource
    }
}

impl<T> Drop for SemaphorePermits<'_, T> {
    fn drop(&mut self) {
        self.sema.signal()
    }
}
