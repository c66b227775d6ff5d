//! The swap slot manager: a bitmap of free/used page-sized swap slots backed
//! by a [`crate::fs::RegularFile`], the same file handle used elsewhere in
//! the kernel for byte-oriented, block-bouncing I/O.
//!
//! The boot sequence points [`SwapTable::new`] at a dedicated swap file; a
//! slot is handed out on [`SwapTable::write_out`] and released back to the
//! bitmap on [`SwapTable::read_in`] or [`SwapTable::free`].

use crate::{KernelError, fs::RegularFile, mm::Page, sync::SpinLock};
use abyss::addressing::PAGE_SIZE;
use alloc::{vec, vec::Vec};

/// A single swap slot's index.
pub type SlotId = usize;

struct Inner {
    bitmap: Vec<bool>,
    device: RegularFile,
}

/// The swap area: one page-sized slot per bit in the bitmap.
pub struct SwapTable {
    inner: SpinLock<Inner>,
}

impl SwapTable {
    /// Creates a swap table backed by `device`, with `slots` page-sized
    /// slots available.
    ///
    /// Slot 0 is permanently marked used and never handed out by
    /// [`SwapTable::write_out`]; it is reserved as the "no slot" sentinel
    /// value other code (e.g. `PageStatus::Swapped`) uses to mean "not
    /// swapped".
    pub fn new(device: RegularFile, slots: usize) -> Self {
        let mut bitmap = vec![false; slots];
        if let Some(sentinel) = bitmap.first_mut() {
            *sentinel = true;
        }
        Self {
            inner: SpinLock::new(Inner { bitmap, device }),
        }
    }

    /// Writes `page`'s contents to a freshly-allocated slot and returns its
    /// id. Fails with [`KernelError::NoSpace`] if the swap area is full.
    pub fn write_out(&self, page: &Page) -> Result<SlotId, KernelError> {
        let mut inner = self.inner.lock();
        let slot = inner
            .bitmap
            .iter()
            .position(|used| !used)
            .ok_or(KernelError::NoSpace)?;
        inner.bitmap[slot] = true;
        let device = inner.device.clone();
        inner.unlock();

        device
            .write(slot * PAGE_SIZE, page.inner())
            .inspect_err(|_| self.free(slot))?;
        Ok(slot)
    }

    /// Reads slot `slot`'s contents back into `page` and frees the slot.
    pub fn read_in(&self, slot: SlotId, page: &mut Page) -> Result<(), KernelError> {
        let device = {
            let inner = self.inner.lock();
            let d = inner.device.clone();
            inner.unlock();
            d
        };
        device.read(slot * PAGE_SIZE, page.inner_mut())?;
        self.free(slot);
        Ok(())
    }

    /// Marks `slot` free without reading it back, e.g. when a swapped-out
    /// page's owning process exits before the page is ever faulted back in.
    pub fn free(&self, slot: SlotId) {
        let mut inner = self.inner.lock();
        inner.bitmap[slot] = false;
        inner.unlock();
    }

    /// Number of slots currently in use.
    pub fn used_slots(&self) -> usize {
        let inner = self.inner.lock();
        let n = inner.bitmap.iter().filter(|b| **b).count();
        inner.unlock();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileBlockNumber, InodeNumber, traits};
    use alloc::collections::btree_map::BTreeMap;

    struct MemDevice {
        blocks: SpinLock<BTreeMap<usize, [u8; 4096]>>,
    }

    impl traits::RegularFile for MemDevice {
        fn ino(&self) -> InodeNumber {
            InodeNumber::new(1).unwrap()
        }
        fn size(&self) -> usize {
            4096 * 16
        }
        fn read(&self, fba: FileBlockNumber, buf: &mut [u8; 4096]) -> Result<bool, KernelError> {
            let blocks = self.blocks.lock();
            *buf = blocks.get(&fba.0).copied().unwrap_or([0u8; 4096]);
            blocks.unlock();
            Ok(true)
        }
        fn write(
            &self,
            fba: FileBlockNumber,
            buf: &[u8; 4096],
            _min_size: usize,
        ) -> Result<(), KernelError> {
            let mut blocks = self.blocks.lock();
            blocks.insert(fba.0, *buf);
            blocks.unlock();
            Ok(())
        }
        fn writeback(&self) -> Result<(), KernelError> {
            Ok(())
        }
    }

    #[test]
    fn write_then_read_back_roundtrips_and_frees() {
        let dev = RegularFile::new(MemDevice {
            blocks: SpinLock::new(BTreeMap::new()),
        });
        let table = SwapTable::new(dev, 4);
        let mut page = Page::new();
        page.inner_mut()[0] = 0x42;
        let slot = table.write_out(&page).unwrap();
        assert_eq!(table.used_slots(), 1);

        let mut back = Page::new();
        table.read_in(slot, &mut back).unwrap();
        assert_eq!(back.inner()[0], 0x42);
        assert_eq!(table.used_slots(), 0);
    }
}
