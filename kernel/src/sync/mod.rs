//! Synchronization primitives used throughout the kernel.
//!
//! [`SpinLock`] is the base mutual-exclusion primitive: it never sleeps and is
//! safe to use while interrupts are disabled. [`Lock`] and [`Semaphore`] build
//! on top of it and on [`crate::thread::Current::park_with`] to provide
//! *sleeping* synchronization for longer critical sections, such as the ones
//! held by the buffer cache or a process's file table.
//!
//! [`Lock`] additionally implements **priority donation**: a thread blocked on
//! a lock temporarily lends its priority to the lock's holder so that a
//! low-priority holder is not starved behind medium-priority threads while a
//! high-priority thread waits on it.

pub mod atomic;
pub mod lock;
pub mod rwlock;
pub mod semaphore;
pub mod spinlock;

pub use lock::Lock;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
