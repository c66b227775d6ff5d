//! A sleeping mutual-exclusion lock with priority donation.
//!
//! Unlike [`SpinLock`](super::SpinLock), a thread blocked on [`Lock`] is
//! parked rather than spun: [`Current::park_with`] removes it from the ready
//! queue and the scheduler only looks at it again once [`LockGuard::unlock`]
//! wakes it. Because a sleeping waiter never uses a cycle, holding a [`Lock`]
//! across a long operation (e.g. touching the buffer cache) is the expected
//! use, whereas a [`SpinLock`](super::SpinLock) is reserved for the short
//! critical sections used to implement the scheduler itself.
//!
//! To avoid *priority inversion* -- a high priority thread waiting forever
//! behind a medium priority thread because a low priority holder never gets
//! scheduled -- acquiring a contended [`Lock`] donates the waiter's effective
//! priority into the holder's [`PriorityCell`]. The donation is withdrawn the
//! moment the lock is released, so it only lasts as long as necessary.

use crate::{
    sync::SpinLock,
    thread::{Current, ParkHandle, PriorityCell, with_current},
};
use alloc::{collections::vec_deque::VecDeque, sync::Arc};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

struct Holder {
    tid: u64,
    priority: Arc<PriorityCell>,
}

/// A mutual exclusion primitive that sleeps waiters and supports priority
/// donation.
pub struct Lock<T> {
    data: UnsafeCell<T>,
    holder: SpinLock<Option<Holder>>,
    waiters: SpinLock<VecDeque<ParkHandle>>,
}

unsafe impl<T: Send> Send for Lock<T> {}
unsafe impl<T: Send> Sync for Lock<T> {}

impl<T> Lock<T> {
    /// Creates a new lock in an unlocked state.
    pub const fn new(t: T) -> Self {
        Self {
            data: UnsafeCell::new(t),
            holder: SpinLock::new(None),
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// This lock's identity, used to key donations so that releasing it only
    /// withdraws the donation it contributed.
    fn id(&self) -> usize {
        self as *const Self as usize
    }

    /// Acquires the lock, blocking (sleeping, not spinning) the current thread
    /// until it is available.
    pub fn acquire(&self) -> LockGuard<'_, T> {
        loop {
            let mut holder = self.holder.lock();
            match holder.as_ref() {
                None => {
                    let (tid, priority) = with_current(|th| (th.tid, th.priority.clone()));
                    *holder = Some(Holder { tid, priority });
                    holder.unlock();
                    return LockGuard { lock: self };
                }
                Some(h) => {
                    // Donate our effective priority to the current holder so it
                    // is not starved behind a medium-priority thread while we wait.
                    let my_priority = with_current(|th| th.priority.effective());
                    h.priority.donate(self.id(), my_priority);
                    holder.unlock();
                    let mut waiters = self.waiters.lock();
                    // The closure runs with interrupts still disabled (we hold
                    // `waiters`); it must unlock before returning so that
                    // `park_with`'s post-condition (interrupts on) holds.
                    Current::park_with(|park_handle| {
                        waiters.push_back(park_handle);
                        waiters.unlock();
                    });
                }
            }
        }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_acquire(&self) -> Option<LockGuard<'_, T>> {
        let mut holder = self.holder.lock();
        if holder.is_some() {
            holder.unlock();
            return None;
        }
        let (tid, priority) = with_current(|th| (th.tid, th.priority.clone()));
        *holder = Some(Holder { tid, priority });
        holder.unlock();
        Some(LockGuard { lock: self })
    }

    /// The tid of the thread currently holding this lock, if any.
    pub fn holder_tid(&self) -> Option<u64> {
        let holder = self.holder.lock();
        let tid = holder.as_ref().map(|h| h.tid);
        holder.unlock();
        tid
    }

    fn release(&self) {
        let mut holder = self.holder.lock();
        if let Some(h) = holder.take() {
            h.priority.revoke(self.id());
        }
        holder.unlock();

        let mut waiters = self.waiters.lock();
        let next = waiters.pop_front();
        waiters.unlock();
        if let Some(next) = next {
            next.unpark();
        }
    }
}

impl<T: Default> Default for Lock<T> {
    fn default() -> Self {
        Lock::new(T::default())
    }
}

/// An RAII guard that releases the [`Lock`] when dropped.
pub struct LockGuard<'a, T> {
    lock: &'a Lock<T>,
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl<T> !Send for LockGuard<'_, T> {}
unsafe impl<T: Sync> Sync for LockGuard<'_, T> {}
