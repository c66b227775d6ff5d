//! The strict priority scheduler used when `-o mlfqs` is not given.
//!
//! [`next_to_run`](Scheduler::next_to_run) always returns the highest
//! *effective* priority thread in the ready queue, where the effective
//! priority accounts for donations recorded on
//! [`PriorityCell`](crate::thread::PriorityCell) by a [`crate::sync::Lock`]
//! this thread holds. Threads of equal effective priority are served in
//! the order they became ready.

use super::Scheduler;
use crate::{sync::SpinLock, thread::Thread};
use alloc::{boxed::Box, collections::vec_deque::VecDeque};

/// A strict-priority, donation-aware ready queue.
pub struct PriorityScheduler {
    ready: SpinLock<VecDeque<Box<Thread>>>,
}

impl PriorityScheduler {
    /// Creates a new, empty priority scheduler.
    pub const fn new() -> Self {
        Self {
            ready: SpinLock::new(VecDeque::new()),
        }
    }
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Sync for PriorityScheduler {}

impl Scheduler for PriorityScheduler {
    fn next_to_run(&self) -> Option<Box<Thread>> {
        let mut q = self.ready.lock();
        // Pick the earliest thread with the highest effective priority: `>`
        // (not `>=`) keeps the first occurrence, preserving FIFO order among
        // threads of equal priority.
        let mut best: Option<(usize, u8)> = None;
        for (i, th) in q.iter().enumerate() {
            let p = th.priority.effective();
            if best.is_none_or(|(_, bp)| p > bp) {
                best = Some((i, p));
            }
        }
        let val = best.and_then(|(i, _)| q.remove(i));
        q.unlock();
        val
    }

    fn push_to_queue(&self, th: Box<Thread>) {
        let mut q = self.ready.lock();
        q.push_back(th);
        q.unlock();
    }

    fn timer_tick(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_among_equal_priority() {
        let sched = PriorityScheduler::new();
        let a = Thread::new("a");
        let b = Thread::new("b");
        sched.push_to_queue(a);
        sched.push_to_queue(b);
        let first = sched.next_to_run().unwrap();
        assert_eq!(&*first.name, "a");
    }
}
