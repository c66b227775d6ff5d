//! Page fault handling: turning a CPU-reported fault into either a resolved
//! demand-paged mapping or a fatal access violation.
//!
//! [`handle`] implements the four-step algorithm every fault goes through:
//! find the VMA covering the faulting address, check the access against its
//! permission, obtain a backing frame (demand-paging it from its file,
//! zero-filling it, or reading it back from swap), and install the mapping.
//! [`crate::interrupt`]'s `handle_page_fault` calls this after re-enabling
//! interrupts, through the concrete `Task` implementation that owns the
//! faulting process's address space.

use crate::{
    KernelError,
    addressing::Va,
    mm::{
        Page,
        frame_table::frame_table,
        page_table::{PageTableRoot, Permission},
        swap::SwapTable,
        vma::{self, PageStatus, Vma, VmaBacking, VmaMap},
    },
};

/// Lets [`obtain_frame`] clear a stale PTE in another thread's page table
/// once that thread's frame has been chosen for eviction. The concrete
/// process table implements this once every running process is tracked.
pub trait PageTableOwners {
    /// Runs `f` with the page table root owned by `tid`, if it is alive.
    fn with_root<R>(&self, tid: u64, f: &mut dyn FnMut(&mut PageTableRoot) -> R) -> Option<R>;
}

/// Obtains a zeroed physical frame, evicting another frame via the clock
/// algorithm if physical memory is exhausted.
///
/// On eviction, the victim's former contents are saved according to what
/// backed it (dropped if clean and file-backed, written to `swap` if
/// anonymous, written back to its file if memory-mapped), and its owner's
/// PTE is cleared through `owners` before the frame is reused.
pub fn obtain_frame(owners: &dyn PageTableOwners, swap: &SwapTable) -> Result<Page, KernelError> {
    if let Some(page) = Page::try_new() {
        return Ok(page);
    }

    let evicted = frame_table().evict_one().ok_or(KernelError::NoMemory)?;
    owners.with_root(evicted.owner_tid, &mut |root| {
        if let Ok(mut slot) = vma::walk_or_create(root, evicted.upage) {
            slot.unmap();
        }
        // SAFETY: the frame is being reclaimed, so any stale translation
        // for it must not survive in this address space's TLB.
        unsafe {
            core::arch::asm!("invlpg [{0}]", in(reg) evicted.upage.into_usize(), options(nostack));
        }
    });

    let mut page = evicted.page;
    match &evicted.vma.backing {
        VmaBacking::LoadSegment { writable: false, .. } => {
            evicted.vma.set_status(evicted.upage, PageStatus::Unmapped);
        }
        VmaBacking::Anonymous | VmaBacking::LoadSegment { .. } => {
            let slot = swap.write_out(&page)?;
            evicted.vma.set_status(evicted.upage, PageStatus::Swapped(slot));
        }
        VmaBacking::Mmap { file, file_offset } => {
            let page_off = evicted.upage.into_usize() as u64 - evicted.vma.start.into_usize() as u64;
            file.write((*file_offset + page_off) as usize, page.inner())?;
            evicted.vma.set_status(evicted.upage, PageStatus::Unmapped);
        }
    }
    page.inner_mut().fill(0);
    Ok(page)
}

/// Loads a freshly-obtained frame's contents for `upage` within `vma`.
fn populate(page: &mut Page, vma: &Vma, upage: Va) -> Result<(), KernelError> {
    match &vma.backing {
        VmaBacking::Anonymous => {}
        VmaBacking::LoadSegment {
            file,
            file_offset,
            file_len,
            ..
        } => {
            let page_off = upage.into_usize() as u64 - vma.start.into_usize() as u64;
            let remaining = file_len.saturating_sub(page_off);
            let to_read = remaining.min(4096) as usize;
            if to_read > 0 {
                file.read((*file_offset + page_off) as usize, &mut page.inner_mut()[..to_read])?;
            }
        }
        VmaBacking::Mmap { file, file_offset } => {
            let page_off = upage.into_usize() as u64 - vma.start.into_usize() as u64;
            file.read((*file_offset + page_off) as usize, page.inner_mut())?;
        }
    }
    Ok(())
}

/// Resolves one page fault.
///
/// `write` and `user_mode` reflect the CPU's fault error code; `owner_tid`
/// identifies the faulting process for frame-table bookkeeping.
pub fn handle(
    owners: &dyn PageTableOwners,
    swap: &SwapTable,
    vmas: &VmaMap,
    root: &mut PageTableRoot,
    owner_tid: u64,
    fault_va: Va,
    write: bool,
    user_mode: bool,
) -> Result<(), KernelError> {
    let vma = vmas.find(fault_va).ok_or(KernelError::BadAddress)?;
    let perm = vma.permission();
    if write && !perm.contains(Permission::WRITE) {
        return Err(KernelError::InvalidAccess);
    }
    if user_mode && !perm.contains(Permission::USER) {
        return Err(KernelError::InvalidAccess);
    }

    let upage = fault_va.page_down();
    match vma.status(upage) {
        PageStatus::Resident => {
            // Spurious fault (e.g. raced with another CPU's eviction): the
            // retried instruction will succeed once rescheduled.
            Ok(())
        }
        PageStatus::Unmapped => {
            let mut page = obtain_frame(owners, swap)?;
            populate(&mut page, &vma, upage)?;
            let pa = page.pa();
            frame_table().push(page, owner_tid, upage, vma.clone());
            let mut slot = vma::walk_or_create(root, upage)?;
            slot.map(pa, perm)?;
            vma.set_status(upage, PageStatus::Resident);
            Ok(())
        }
        PageStatus::Swapped(slot_id) => {
            let mut page = obtain_frame(owners, swap)?;
            swap.read_in(slot_id, &mut page)?;
            let pa = page.pa();
            frame_table().push(page, owner_tid, upage, vma.clone());
            let mut pte_slot = vma::walk_or_create(root, upage)?;
            pte_slot.map(pa, perm)?;
            vma.set_status(upage, PageStatus::Resident);
            Ok(())
        }
    }
}
