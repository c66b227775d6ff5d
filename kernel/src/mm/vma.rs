//! Virtual memory areas: the per-process map from a region of user address
//! space to what backs it (an executable's load segment, the stack, or an
//! `mmap`ed file), plus the hand-rolled page table walker the rest of the
//! virtual memory system builds on.
//!
//! [`page_table::page_table.rs`](super::page_table) stops at raw PML4/PDP/PD/PT
//! entries; nothing in it walks all four levels at once or allocates the
//! intermediate tables on demand, so [`walk`] and [`walk_or_create`] do that
//! here, once, for every caller in this module to share.

use crate::{
    KernelError,
    addressing::{Pa, Va},
    mm::{
        Page,
        page_table::{PdeFlags, PdpeFlags, Permission, Pml4eFlags, PteFlags},
    },
    sync::SpinLock,
};
use abyss::addressing::PAGE_SIZE;
use alloc::{collections::btree_map::BTreeMap, sync::Arc, vec::Vec};

type Root = crate::mm::page_table::PageTableRoot;

/// Splits a virtual address into its four page-table indices.
fn indices(va: Va) -> (usize, usize, usize, usize) {
    let a = va.into_usize();
    (
        (a >> 39) & 0x1ff,
        (a >> 30) & 0x1ff,
        (a >> 21) & 0x1ff,
        (a >> 12) & 0x1ff,
    )
}

fn perm_to_pte_flags(perm: Permission) -> PteFlags {
    let mut flags = PteFlags::empty();
    if perm.contains(Permission::WRITE) {
        flags |= PteFlags::RW;
    }
    if perm.contains(Permission::USER) {
        flags |= PteFlags::US;
    }
    if !perm.contains(Permission::EXECUTABLE) {
        flags |= PteFlags::XD;
    }
    flags
}

/// Walks the page table for `va`, returning the PTE if the full path down to
/// the page table exists. Does not allocate any missing intermediate level.
pub fn walk(root: &Root, va: Va) -> Option<Pte> {
    let (l4, l3, l2, l1) = indices(va);
    let pdp = root[l4].into_pdp().ok()?;
    let pd = pdp[l3].into_pd().ok()?;
    let pt = pd[l2].into_pt().ok()?;
    Some(pt[l1])
}

/// Walks the page table for `va`, allocating any missing PML4/PDP/PD level
/// (but not the final page itself) so the returned [`Pte`] slot can be
/// written to.
pub fn walk_or_create<'a>(root: &'a mut Root, va: Va) -> Result<PteSlot<'a>, KernelError> {
    let (l4, l3, l2, l1) = indices(va);

    let pml4e = &mut root[l4];
    if pml4e.pa().is_none() {
        let page = Page::new();
        let pa = page.pa();
        core::mem::forget(page);
        pml4e
            .set_pa(pa)
            .map_err(|_| KernelError::InvalidArgument)?;
        pml4e.set_flags(Pml4eFlags::P | Pml4eFlags::RW | Pml4eFlags::US);
    }
    let pdp = pml4e
        .into_pdp_mut()
        .map_err(|_| KernelError::InvalidArgument)?;

    let pdpe = &mut pdp[l3];
    if pdpe.pa().is_none() {
        let page = Page::new();
        let pa = page.pa();
        core::mem::forget(page);
        pdpe.set_pa(pa).map_err(|_| KernelError::InvalidArgument)?;
        pdpe.set_flags(PdpeFlags::P | PdpeFlags::RW | PdpeFlags::US);
    }
    let pd = pdpe
        .into_pd_mut()
        .map_err(|_| KernelError::InvalidArgument)?;

    let pde = &mut pd[l2];
    if pde.pa().is_none() {
        let page = Page::new();
        let pa = page.pa();
        core::mem::forget(page);
        pde.set_pa(pa).map_err(|_| KernelError::InvalidArgument)?;
        pde.set_flags(PdeFlags::P | PdeFlags::RW | PdeFlags::US);
    }
    let pt = pde
        .into_pt_mut()
        .map_err(|_| KernelError::InvalidArgument)?;

    Ok(PteSlot::new(&mut pt[l1]))
}

/// A mutable handle to a single PTE slot, returned by [`walk_or_create`].
pub struct PteSlot<'a>(&'a mut crate::mm::page_table::Pte);

impl<'a> PteSlot<'a> {
    fn new(pte: &'a mut crate::mm::page_table::Pte) -> Self {
        Self(pte)
    }

    /// Maps this slot to `pa` with the given permission, returning an error
    /// if the slot is already mapped.
    pub fn map(&mut self, pa: Pa, perm: Permission) -> Result<(), KernelError> {
        if self.0.pa().is_some() {
            return Err(KernelError::InvalidArgument);
        }
        self.0
            .set_pa(pa)
            .map_err(|_| KernelError::InvalidArgument)?;
        unsafe { self.0.set_flags(perm_to_pte_flags(perm) | PteFlags::P) };
        Ok(())
    }

    /// Unmaps this slot, returning the physical address it pointed to.
    pub fn unmap(&mut self) -> Option<Pa> {
        unsafe { self.0.clear() }
    }

    /// The physical address currently mapped here, if any.
    pub fn pa(&self) -> Option<Pa> {
        self.0.pa()
    }

    /// Whether the hardware accessed bit is set.
    pub fn accessed(&self) -> bool {
        self.0.flags().contains(PteFlags::A)
    }

    /// Whether the hardware dirty bit is set.
    pub fn dirty(&self) -> bool {
        self.0.flags().contains(PteFlags::D)
    }
}

pub use crate::mm::page_table::Pte;

/// What backs a virtual memory area.
pub enum VmaBacking {
    /// Demand-paged from a file's load segment; `writable` determines
    /// whether the page is marked copy-on-demand or read-write, and the
    /// bytes past `file_len` within the page are zero-filled.
    LoadSegment {
        file: crate::fs::RegularFile,
        file_offset: u64,
        file_len: u64,
        writable: bool,
        executable: bool,
    },
    /// Zero-filled anonymous memory, e.g. the stack or the BSS tail of a
    /// segment.
    Anonymous,
    /// A memory-mapped file region; writes are written back to the file on
    /// eviction or `munmap`.
    Mmap {
        file: crate::fs::RegularFile,
        file_offset: u64,
    },
}

/// A shadow record of one demand-paged page: whether it is currently
/// resident, swapped out, or has never been touched.
#[derive(Clone, Copy)]
pub enum PageStatus {
    /// Never faulted in.
    Unmapped,
    /// Resident; the hardware PTE is authoritative for location.
    Resident,
    /// Swapped out to the given slot.
    Swapped(usize),
}

/// A single contiguous virtual memory area.
pub struct Vma {
    /// Inclusive start of the region, page-aligned.
    pub start: Va,
    /// Exclusive end of the region, page-aligned.
    pub end: Va,
    pub backing: VmaBacking,
    /// Per-page shadow state, keyed by page-aligned virtual address.
    pages: SpinLock<BTreeMap<Va, PageStatus>>,
}

impl Vma {
    pub fn new(start: Va, end: Va, backing: VmaBacking) -> Self {
        assert_eq!(start.into_usize() % PAGE_SIZE, 0);
        assert_eq!(end.into_usize() % PAGE_SIZE, 0);
        Self {
            start,
            end,
            backing,
            pages: SpinLock::new(BTreeMap::new()),
        }
    }

    pub fn contains(&self, va: Va) -> bool {
        let a = va.into_usize();
        a >= self.start.into_usize() && a < self.end.into_usize()
    }

    pub fn status(&self, va: Va) -> PageStatus {
        let pages = self.pages.lock();
        let status = pages
            .get(&va.page_down())
            .copied()
            .unwrap_or(PageStatus::Unmapped);
        pages.unlock();
        status
    }

    pub fn set_status(&self, va: Va, status: PageStatus) {
        let mut pages = self.pages.lock();
        pages.insert(va.page_down(), status);
        pages.unlock();
    }

    pub fn clear_status(&self, va: Va) -> Option<PageStatus> {
        let mut pages = self.pages.lock();
        let s = pages.remove(&va.page_down());
        pages.unlock();
        s
    }

    /// Every page-aligned address currently tracked for this VMA.
    pub fn tracked_pages(&self) -> Vec<Va> {
        let pages = self.pages.lock();
        let v: Vec<Va> = pages.keys().copied().collect();
        pages.unlock();
        v
    }

    /// Permission this area's resident pages should be mapped with.
    pub fn permission(&self) -> Permission {
        let mut perm = Permission::READ | Permission::USER;
        match &self.backing {
            VmaBacking::LoadSegment {
                writable,
                executable,
                ..
            } => {
                if *writable {
                    perm |= Permission::WRITE;
                }
                if *executable {
                    perm |= Permission::EXECUTABLE;
                }
            }
            VmaBacking::Anonymous => perm |= Permission::WRITE,
            VmaBacking::Mmap { .. } => perm |= Permission::WRITE,
        }
        perm
    }
}

/// The full set of VMAs for one process's address space.
pub struct VmaMap {
    areas: SpinLock<Vec<Arc<Vma>>>,
}

impl VmaMap {
    pub const fn new() -> Self {
        Self {
            areas: SpinLock::new(Vec::new()),
        }
    }

    pub fn insert(&self, vma: Arc<Vma>) {
        let mut areas = self.areas.lock();
        areas.push(vma);
        areas.unlock();
    }

    pub fn remove(&self, start: Va) -> Option<Arc<Vma>> {
        let mut areas = self.areas.lock();
        let idx = areas.iter().position(|v| v.start == start)?;
        let v = areas.remove(idx);
        areas.unlock();
        Some(v)
    }

    /// The VMA containing `va`, if any.
    pub fn find(&self, va: Va) -> Option<Arc<Vma>> {
        let areas = self.areas.lock();
        let found = areas.iter().find(|v| v.contains(va)).cloned();
        areas.unlock();
        found
    }

    pub fn all(&self) -> Vec<Arc<Vma>> {
        let areas = self.areas.lock();
        let v = areas.clone();
        areas.unlock();
        v
    }
}

impl Default for VmaMap {
    fn default() -> Self {
        Self::new()
    }
}
