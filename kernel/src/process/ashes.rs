//! Post-mortem record a parent keeps for each child it spawned.
//!
//! Named after the fact that it outlives the child: once a child exits, its
//! [`Thread`](crate::thread::Thread) and [`Process`](super::Process) are torn
//! down and freed, but the parent may not have called `wait` yet. The
//! `Ashes` is the one thing that survives that teardown, carrying the
//! load outcome and exit status back to whoever eventually waits.

use crate::sync::Semaphore;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// One child's post-mortem record, shared between parent and child.
pub struct Ashes {
    /// The child's thread id.
    pub child_tid: u64,
    /// Whether `exec`'s loader succeeded. Meaningless until `load_done` is
    /// signaled.
    pub load_success: AtomicBool,
    exit_status: AtomicI32,
    /// Set once a parent has consumed this record through `wait`, so a
    /// second `wait` on the same child is rejected.
    pub waited: AtomicBool,
    /// Signaled once by the child after the loader runs, one way or
    /// the other.
    pub load_done: Semaphore<()>,
    /// Signaled once by the child as it exits.
    pub exit: Semaphore<()>,
}

impl Ashes {
    /// Creates a fresh record for a child about to be spawned as `child_tid`.
    pub fn new(child_tid: u64) -> Arc<Self> {
        Arc::new(Self {
            child_tid,
            load_success: AtomicBool::new(false),
            exit_status: AtomicI32::new(-1),
            waited: AtomicBool::new(false),
            load_done: Semaphore::new(0, ()),
            exit: Semaphore::new(0, ()),
        })
    }

    /// Records the child's final exit status, called once as the child
    /// tears down.
    pub fn set_exit_status(&self, status: i32) {
        self.exit_status.store(status, Ordering::SeqCst);
    }

    /// The child's exit status. Only meaningful after `exit` is signaled.
    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::SeqCst)
    }
}
