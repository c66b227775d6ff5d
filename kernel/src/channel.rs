//! A bounded, blocking byte channel used as the backing for in-kernel pipes.
//!
//! [`channel`] returns a connected [`Sender`]/[`Receiver`] pair sharing a
//! fixed-capacity ring buffer. A send blocks while the buffer is full; a
//! receive blocks while the buffer is empty and at least one [`Sender`] is
//! still alive. Once every [`Sender`] has been dropped, a blocked receive
//! wakes and reports end-of-file instead of blocking forever.
//!
//! Capacity is tracked with two counting [`Semaphore`]s, one per direction,
//! following the same producer/consumer handoff the buffer cache's
//! read-ahead daemon uses: a side "takes" a permit with [`Semaphore::wait`]
//! and immediately forgets the guard instead of letting it auto-release,
//! so the permit stays consumed until the other side explicitly
//! [`Semaphore::signal`]s it back.

use crate::sync::{Semaphore, SpinLock};
use alloc::{collections::vec_deque::VecDeque, sync::Arc};

const CAPACITY: usize = 512;

struct Inner<T> {
    buf: VecDeque<T>,
    senders: usize,
}

struct Shared<T> {
    inner: SpinLock<Inner<T>>,
    /// Permits equal to the number of items currently buffered.
    readable: Semaphore<()>,
    /// Permits equal to the number of free slots in the buffer.
    writable: Semaphore<()>,
}

/// The sending half of a byte channel.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

/// The receiving half of a byte channel.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

/// Creates a connected [`Sender`]/[`Receiver`] pair backed by a
/// fixed-capacity buffer.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        inner: SpinLock::new(Inner {
            buf: VecDeque::new(),
            senders: 1,
        }),
        readable: Semaphore::new(0, ()),
        writable: Semaphore::new(CAPACITY, ()),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        let mut inner = self.shared.inner.lock();
        inner.senders += 1;
        inner.unlock();
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.senders -= 1;
        let last = inner.senders == 0;
        inner.unlock();
        // Wake a blocked receiver so it can observe end-of-file.
        if last {
            self.shared.readable.signal();
        }
    }
}

impl<T> Sender<T> {
    /// Sends one item, blocking while the buffer is full.
    pub fn send(&self, item: T) {
        let permit = self.shared.writable.wait();
        core::mem::forget(permit);
        let mut inner = self.shared.inner.lock();
        inner.buf.push_back(item);
        inner.unlock();
        self.shared.readable.signal();
    }
}

/// Outcome of [`Receiver::recv`].
pub enum Recv<T> {
    /// An item was available.
    Item(T),
    /// Every [`Sender`] has been dropped and the buffer is empty.
    Eof,
}

impl<T> Receiver<T> {
    /// Receives one item, blocking while the buffer is empty and at least
    /// one [`Sender`] is still alive.
    pub fn recv(&self) -> Recv<T> {
        loop {
            let permit = self.shared.readable.wait();
            core::mem::forget(permit);
            let mut inner = self.shared.inner.lock();
            if let Some(item) = inner.buf.pop_front() {
                inner.unlock();
                self.shared.writable.signal();
                return Recv::Item(item);
            }
            // Woken by the last sender's drop with nothing buffered.
            let senders = inner.senders;
            inner.unlock();
            if senders == 0 {
                // Re-signal so any other blocked receiver also observes EOF.
                self.shared.readable.signal();
                return Recv::Eof;
            }
        }
    }

    /// Number of items currently buffered, without blocking.
    pub fn len(&self) -> usize {
        let inner = self.shared.inner.lock();
        let n = inner.buf.len();
        inner.unlock();
        n
    }

    /// Whether the buffer currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

unsafe impl<T: Send> Send for Sender<T> {}
unsafe impl<T: Send> Send for Receiver<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_recv_preserves_order() {
        let (tx, rx) = channel::<u8>();
        tx.send(1);
        tx.send(2);
        tx.send(3);
        assert!(matches!(rx.recv(), Recv::Item(1)));
        assert!(matches!(rx.recv(), Recv::Item(2)));
        assert!(matches!(rx.recv(), Recv::Item(3)));
    }

    #[test]
    fn drop_of_last_sender_yields_eof() {
        let (tx, rx) = channel::<u8>();
        tx.send(0xff);
        drop(tx);
        assert!(matches!(rx.recv(), Recv::Item(0xff)));
        assert!(matches!(rx.recv(), Recv::Eof));
    }
}
