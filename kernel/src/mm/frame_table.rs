//! The frame table: bookkeeping for every physical frame handed out to a
//! user process, and the clock algorithm used to reclaim one under memory
//! pressure.
//!
//! Every frame that backs a user page is registered here with the owning
//! thread's tid and the user virtual address it is mapped at. When physical
//! memory is exhausted, [`FrameTable::evict_one`] walks the table in a
//! circular "clock hand" order, looking at each frame's accessed bit: a frame
//! whose accessed bit is set gets a second chance (the bit is cleared and the
//! hand advances), otherwise the frame is reclaimed. Frames pinned via
//! [`FrameTable::pin`] -- typically while a syscall is touching a user buffer
//! -- are skipped entirely, mirroring the page-pinning discipline described
//! for the syscall boundary.

use crate::{
    mm::{Page, vma::Vma},
    sync::SpinLock,
    thread::Thread,
};
use abyss::addressing::Va;
use alloc::{sync::Arc, vec::Vec};

struct Entry {
    page: Page,
    owner_tid: u64,
    upage: Va,
    vma: Arc<Vma>,
    pinned: bool,
    accessed_hint: bool,
}

/// The physical frame that [`FrameTable::evict_one`] reclaimed.
pub struct EvictedFrame {
    /// The reclaimed physical page. Its former contents are still resident;
    /// the caller must save them (to swap or back to the file) before reuse.
    pub page: Page,
    /// The thread that owned the evicted frame.
    pub owner_tid: u64,
    /// The user virtual address the frame was mapped at.
    pub upage: Va,
    /// The VMA the evicted frame belonged to, so the caller knows how (or
    /// whether) to save its contents.
    pub vma: Arc<Vma>,
}

/// The system-wide frame table.
pub struct FrameTable {
    entries: SpinLock<Vec<Entry>>,
    hand: SpinLock<usize>,
}

impl FrameTable {
    const fn new() -> Self {
        Self {
            entries: SpinLock::new(Vec::new()),
            hand: SpinLock::new(0),
        }
    }

    /// Registers a freshly-obtained frame under the current owner.
    pub fn push(&self, page: Page, owner_tid: u64, upage: Va, vma: Arc<Vma>) {
        let mut entries = self.entries.lock();
        entries.push(Entry {
            page,
            owner_tid,
            upage,
            vma,
            pinned: false,
            accessed_hint: true,
        });
        entries.unlock();
    }

    /// Removes and returns the frame mapped at `upage` for `owner_tid`, if
    /// tracked, e.g. when a VMA is torn down or its page explicitly unmapped.
    pub fn remove(&self, owner_tid: u64, upage: Va) -> Option<Page> {
        let mut entries = self.entries.lock();
        let idx = entries
            .iter()
            .position(|e| e.owner_tid == owner_tid && e.upage == upage)?;
        let entry = entries.remove(idx);
        entries.unlock();
        Some(entry.page)
    }

    /// Removes every frame belonging to `owner_tid`, e.g. on process exit.
    /// The caller is handed the reclaimed pages so it can drop them after
    /// also tearing down the corresponding page table.
    pub fn remove_all(&self, owner_tid: u64) -> Vec<(Va, Page)> {
        let mut entries = self.entries.lock();
        let mut out = Vec::new();
        let mut i = 0;
        while i < entries.len() {
            if entries[i].owner_tid == owner_tid {
                let e = entries.remove(i);
                out.push((e.upage, e.page));
            } else {
                i += 1;
            }
        }
        entries.unlock();
        out
    }

    /// Marks the frame at `upage` as pinned, preventing eviction until
    /// [`FrameTable::unpin`] is called. Used while a syscall holds a raw
    /// pointer into a user buffer.
    pub fn pin(&self, owner_tid: u64, upage: Va) {
        let mut entries = self.entries.lock();
        if let Some(e) = entries
            .iter_mut()
            .find(|e| e.owner_tid == owner_tid && e.upage == upage)
        {
            e.pinned = true;
        }
        entries.unlock();
    }

    /// Clears the pin set by [`FrameTable::pin`].
    pub fn unpin(&self, owner_tid: u64, upage: Va) {
        let mut entries = self.entries.lock();
        if let Some(e) = entries
            .iter_mut()
            .find(|e| e.owner_tid == owner_tid && e.upage == upage)
        {
            e.pinned = false;
        }
        entries.unlock();
    }

    /// Pins every frame owned by `owner_tid`, for the duration of a syscall
    /// that may touch any part of the process's address space (e.g. `read`
    /// into a buffer whose exact pages aren't known up front).
    pub fn pin_all(&self, owner_tid: u64) {
        let mut entries = self.entries.lock();
        for e in entries.iter_mut().filter(|e| e.owner_tid == owner_tid) {
            e.pinned = true;
        }
        entries.unlock();
    }

    /// Reverses [`FrameTable::pin_all`].
    pub fn unpin_all(&self, owner_tid: u64) {
        let mut entries = self.entries.lock();
        for e in entries.iter_mut().filter(|e| e.owner_tid == owner_tid) {
            e.pinned = false;
        }
        entries.unlock();
    }

    /// Records whether the hardware accessed bit was observed set for
    /// `upage`, feeding the clock algorithm's second-chance decision.
    pub fn note_accessed(&self, owner_tid: u64, upage: Va, accessed: bool) {
        let mut entries = self.entries.lock();
        if let Some(e) = entries
            .iter_mut()
            .find(|e| e.owner_tid == owner_tid && e.upage == upage)
        {
            e.accessed_hint |= accessed;
        }
        entries.unlock();
    }

    /// Runs the clock algorithm to reclaim one unpinned frame.
    ///
    /// Walks the table starting from the saved hand position; a frame with
    /// `accessed_hint` set is given a second chance (the hint is cleared and
    /// the hand advances past it), a pinned frame is skipped without
    /// consuming its second chance, and the first frame found with a clear
    /// hint is reclaimed. Returns `None` if every frame is pinned.
    pub fn evict_one(&self) -> Option<EvictedFrame> {
        let mut entries = self.entries.lock();
        if entries.is_empty() {
            entries.unlock();
            return None;
        }
        let mut hand = self.hand.lock();
        let n = entries.len();
        let mut victim = None;
        for _ in 0..(2 * n) {
            let i = *hand % n;
            *hand = (*hand + 1) % n;
            if entries[i].pinned {
                continue;
            }
            if entries[i].accessed_hint {
                entries[i].accessed_hint = false;
                continue;
            }
            victim = Some(i);
            break;
        }
        hand.unlock();
        let victim = victim?;
        let entry = entries.remove(victim);
        entries.unlock();
        Some(EvictedFrame {
            page: entry.page,
            owner_tid: entry.owner_tid,
            upage: entry.upage,
            vma: entry.vma,
        })
    }

    /// Total number of frames currently tracked.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock();
        let n = entries.len();
        entries.unlock();
        n
    }

    /// Whether the frame table has no tracked frames.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

unsafe impl Sync for FrameTable {}

static FRAME_TABLE: FrameTable = FrameTable::new();

/// The system-wide frame table.
pub fn frame_table() -> &'static FrameTable {
    &FRAME_TABLE
}

/// Current thread's tid, the key [`FrameTable`] entries are owned under.
pub fn current_owner() -> u64 {
    crate::thread::with_current(|th: &mut Thread| th.tid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::vma::VmaBacking;

    fn va(n: usize) -> Va {
        Va::new(0x4000_0000_0000 + n * 0x1000).unwrap()
    }

    fn anon_vma() -> Arc<Vma> {
        Arc::new(Vma::new(va(0), va(16), VmaBacking::Anonymous))
    }

    #[test]
    fn second_chance_skips_accessed() {
        let ft = FrameTable::new();
        let vma = anon_vma();
        ft.push(Page::new(), 1, va(0), vma.clone());
        ft.push(Page::new(), 1, va(1), vma);
        // Both start with accessed_hint = true, so the first pass clears
        // both hints and the second pass reclaims upage 0.
        let victim = ft.evict_one().unwrap();
        assert_eq!(victim.upage, va(0));
    }

    #[test]
    fn pinned_frames_are_never_evicted() {
        let ft = FrameTable::new();
        ft.push(Page::new(), 1, va(0), anon_vma());
        ft.pin(1, va(0));
        assert!(ft.evict_one().is_none());
    }
}
