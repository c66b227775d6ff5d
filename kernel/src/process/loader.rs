//! Builds a fresh address space for a new program: maps each `PT_LOAD`
//! segment as a demand-paged [`Vma`], reserves an anonymous stack region,
//! and lays out `argv` at the top of it.
//!
//! Segment contents and stack bytes both have to land in physical memory
//! before the program ever runs, so this walks the same [`page_fault::handle`]
//! path a hardware fault would take: every byte written here is written by
//! first faulting its page in (as if the not-yet-running thread had touched
//! it), then copying through the kernel's direct-mapped view of the backing
//! frame.

use super::elf::{Elf, PType};
use crate::{
    KernelError,
    addressing::Va,
    fs::RegularFile,
    mm::{
        page_fault,
        page_table::{PageTableRoot, Permission},
        swap::SwapTable,
        vma::{self, Vma, VmaBacking, VmaMap},
    },
    syscall::Registers,
};
use abyss::addressing::PAGE_SIZE;
use alloc::{sync::Arc, vec::Vec};

/// Top of the initial user stack, exclusive. Matches the layout used across
/// course-provided user binaries, which are linked assuming this address.
pub(super) const STACK_TOP: usize = 0x4748_0000;
/// Size of the stack region reserved up front. Further growth past this is
/// handled by the ordinary stack-growth page fault path.
const STACK_SIZE: usize = 0x10000;
/// `argv`/`argc` arrays are pointer-aligned.
const STACK_ALIGN: usize = 8;

/// Loads `file` as a freshly-exec'd program into the address space described
/// by `vmas`/`root`, passing `args` as `argv`.
///
/// Returns the initial register frame a new thread should be launched with:
/// `rip` at the entry point, `rsp`/`rdi`/`rsi` set up per the standard
/// `argc`/`argv` calling convention.
pub fn load(
    owners: &dyn page_fault::PageTableOwners,
    swap: &SwapTable,
    vmas: &VmaMap,
    root: &mut PageTableRoot,
    owner_tid: u64,
    file: &RegularFile,
    args: &[&str],
) -> Result<Registers, KernelError> {
    let elf = Elf::from_file(file.clone()).ok_or(KernelError::InvalidArgument)?;
    for phdr in elf.phdrs()? {
        if phdr.type_ == PType::Load {
            map_segment(vmas, &phdr, file)?;
        }
    }

    let stack_start =
        Va::new(STACK_TOP - STACK_SIZE).ok_or(KernelError::InvalidArgument)?;
    let stack_end = Va::new(STACK_TOP).ok_or(KernelError::InvalidArgument)?;
    if vmas.find(stack_start).is_some() || vmas.find(Va::new(STACK_TOP - 1).unwrap()).is_some() {
        return Err(KernelError::InvalidArgument);
    }
    vmas.insert(Arc::new(Vma::new(stack_start, stack_end, VmaBacking::Anonymous)));

    let mut writer = StackWriter {
        owners,
        swap,
        vmas,
        root,
        tid: owner_tid,
        sp: STACK_TOP,
    };
    let (argc, argv, sp) = build_stack(&mut writer, args)?;

    let mut regs = Registers::new();
    *regs.rip() = elf.entry() as usize;
    *regs.rsp() = sp;
    regs.gprs.rdi = argc;
    regs.gprs.rsi = argv.into_usize();
    Ok(regs)
}

/// Maps one `PT_LOAD` segment as a [`VmaBacking::LoadSegment`] area. Assumes
/// `p_vaddr`/`p_offset` are page-aligned, which the compilers and linkers
/// producing these binaries always arrange.
fn map_segment(vmas: &VmaMap, phdr: &super::elf::Phdr, file: &RegularFile) -> Result<(), KernelError> {
    if phdr.vaddr as usize % PAGE_SIZE != 0 {
        return Err(KernelError::InvalidArgument);
    }
    let start = Va::new(phdr.vaddr as usize).ok_or(KernelError::InvalidArgument)?;
    let end_addr = (phdr.vaddr + phdr.memsz) as usize;
    let end = Va::new(end_addr.div_ceil(PAGE_SIZE) * PAGE_SIZE).ok_or(KernelError::InvalidArgument)?;
    if vmas.find(start).is_some() {
        return Err(KernelError::InvalidArgument);
    }
    let perm = phdr.permission();
    vmas.insert(Arc::new(Vma::new(
        start,
        end,
        VmaBacking::LoadSegment {
            file: file.clone(),
            file_offset: phdr.offset,
            file_len: phdr.filesz,
            writable: perm.contains(Permission::WRITE),
            executable: perm.contains(Permission::EXECUTABLE),
        },
    )));
    Ok(())
}

/// Writes bytes into the not-yet-running stack by faulting pages in one at a
/// time and copying through the kernel's direct map of the resulting frame.
struct StackWriter<'a> {
    owners: &'a dyn page_fault::PageTableOwners,
    swap: &'a SwapTable,
    vmas: &'a VmaMap,
    root: &'a mut PageTableRoot,
    tid: u64,
    sp: usize,
}

impl<'a> StackWriter<'a> {
    fn write_at(&mut self, va: Va, bytes: &[u8]) -> Result<(), KernelError> {
        let mut off = 0;
        while off < bytes.len() {
            let cur = Va::new(va.into_usize() + off).ok_or(KernelError::InvalidArgument)?;
            page_fault::handle(self.owners, self.swap, self.vmas, self.root, self.tid, cur, true, true)?;
            let pte = vma::walk(self.root, cur).ok_or(KernelError::BadAddress)?;
            let pa = pte.pa().ok_or(KernelError::BadAddress)?;
            let page_off = cur.into_usize() & (PAGE_SIZE - 1);
            let n = (PAGE_SIZE - page_off).min(bytes.len() - off);
            let kva = pa.into_kva().into_usize();
            // SAFETY: `pa` was just mapped resident by `page_fault::handle`
            // for this exact address; its direct-mapped kernel view is a
            // valid, exclusively-owned (not yet user-visible) page.
            unsafe {
                core::ptr::copy_nonoverlapping(bytes[off..].as_ptr(), kva as *mut u8, n);
            }
            off += n;
        }
        Ok(())
    }

    /// Decrements `sp` by `bytes.len()` and writes `bytes` there.
    fn push(&mut self, bytes: &[u8]) -> Result<Va, KernelError> {
        self.sp -= bytes.len();
        let va = Va::new(self.sp).ok_or(KernelError::InvalidArgument)?;
        self.write_at(va, bytes)?;
        Ok(va)
    }

    fn push_usize(&mut self, v: usize) -> Result<Va, KernelError> {
        self.push(&v.to_ne_bytes())
    }

    /// Pushes `s`'s bytes followed by a null terminator, returning the
    /// string's start address (its lowest address, for use as an `argv`
    /// entry).
    fn push_str(&mut self, s: &str) -> Result<Va, KernelError> {
        self.push(&[0u8])?;
        self.push(s.as_bytes())
    }

    fn align_down(&mut self, to: usize) {
        self.sp &= !(to - 1);
    }
}

/// Lays out `argv` at the top of the stack and returns `(argc, argv, rsp)`
/// per the documented layout: strings, then the pointer array (high to low
/// so `argv[0]` ends up at the lowest address), then a fake return address.
fn build_stack(w: &mut StackWriter, args: &[&str]) -> Result<(usize, Va, usize), KernelError> {
    let mut string_addrs = Vec::with_capacity(args.len());
    for arg in args {
        string_addrs.push(w.push_str(arg)?);
    }
    w.align_down(STACK_ALIGN);

    w.push_usize(0)?; // argv[argc] sentinel
    for addr in string_addrs.iter().rev() {
        w.push_usize(addr.into_usize())?;
    }
    let argv = Va::new(w.sp).ok_or(KernelError::InvalidArgument)?;

    w.push_usize(0)?; // fake return address
    Ok((args.len(), argv, w.sp))
}
