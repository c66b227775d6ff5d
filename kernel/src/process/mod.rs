//! The concrete user-process [`Task`]: an address space (page table, VMA
//! map, swap table) plus an open-file table, wired into the kernel's
//! `syscall`/`page_fault` traps.
//!
//! Each process is a single thread; there is no `fork`, only `exec`-style
//! spawning of a brand new program from a command line, in the spirit of
//! the original Pintos project this is modeled on.

pub mod ashes;
mod elf;
pub mod file_table;
mod loader;

use crate::{
    KernelError,
    addressing::Va,
    fs::{FileSystem, RegularFile},
    mm::{
        frame_table::frame_table,
        page_fault::{self, PageTableOwners},
        page_table::PageTableRoot,
        swap::SwapTable,
        vma::{self, PageStatus, Vma, VmaBacking, VmaMap},
    },
    sync::SpinLock,
    syscall::{Registers, SyscallAbi, uaccess::UserCString},
    task::{PFErrorCode, Task},
    thread::{Current, JoinHandle, ThreadBuilder, with_current},
};
use abyss::addressing::{Pa, PAGE_SIZE};
use alloc::{boxed::Box, collections::btree_map::BTreeMap, sync::Arc, vec::Vec};
use ashes::Ashes;
use core::{ops::Range, sync::atomic::Ordering};
use file_table::FileTable;

const SYS_HALT: usize = 0;
const SYS_EXIT: usize = 1;
const SYS_EXEC: usize = 2;
const SYS_WAIT: usize = 3;
const SYS_CREATE: usize = 4;
const SYS_REMOVE: usize = 5;
const SYS_OPEN: usize = 6;
const SYS_FILESIZE: usize = 7;
const SYS_READ: usize = 8;
const SYS_WRITE: usize = 9;
const SYS_SEEK: usize = 10;
const SYS_TELL: usize = 11;
const SYS_CLOSE: usize = 12;
const SYS_MMAP: usize = 13;
const SYS_MUNMAP: usize = 14;
const SYS_PIPE: usize = 15;

/// Every live process's page table root, keyed by its thread id. Lets
/// eviction reach into a process other than the one currently running to
/// clear a stale PTE, since a frame-table entry only knows its owner's tid.
static PROCESS_TABLE: SpinLock<BTreeMap<u64, Arc<SpinLock<Box<PageTableRoot>>>>> =
    SpinLock::new(BTreeMap::new());

static SWAP: SpinLock<Option<Arc<SwapTable>>> = SpinLock::new(None);

/// Installs the system-wide swap device. Must run once during boot, before
/// any process can fault in demand-paged memory.
pub fn init_swap(device: RegularFile, slots: usize) {
    let mut guard = SWAP.lock();
    *guard = Some(Arc::new(SwapTable::new(device, slots)));
    guard.unlock();
}

fn swap_table() -> Arc<SwapTable> {
    let guard = SWAP.lock();
    let table = guard.clone().expect("swap table not initialized before process spawn");
    guard.unlock();
    table
}

/// Reaches into [`PROCESS_TABLE`] on behalf of [`crate::mm::page_fault::obtain_frame`].
struct GlobalOwners;

impl PageTableOwners for GlobalOwners {
    fn with_root<R>(&self, tid: u64, f: &mut dyn FnMut(&mut PageTableRoot) -> R) -> Option<R> {
        let table = PROCESS_TABLE.lock();
        let root = table.get(&tid).cloned();
        table.unlock();
        let root = root?;
        let mut guard = root.lock();
        let result = f(&mut guard);
        guard.unlock();
        Some(result)
    }
}

/// Reads the user `rsp` a thread was interrupted at, if it is currently
/// mid-trap. Used by the stack-growth heuristic in [`Process::page_fault`].
fn current_user_rsp() -> Option<usize> {
    with_current(|th| {
        let guard = th.interrupt_frame.lock();
        let ptr = *guard;
        guard.unlock();
        if ptr.is_null() {
            None
        } else {
            // SAFETY: non-null only while this thread is handling a trap;
            // `Registers` is `Copy`, so reading through the pointer takes an
            // independent snapshot rather than aliasing a mutable reference.
            let mut regs = unsafe { *ptr };
            Some(*regs.rsp())
        }
    })
}

/// Maximum depth the stack is allowed to grow to, below which a fault past
/// the mapped region is treated as a real access violation instead.
const MAX_STACK_SIZE: usize = 8 * 1024 * 1024;
/// Slack below the observed `rsp` a fault is still accepted within, to cover
/// instructions (like `push`) that touch memory below `rsp` before it is
/// adjusted.
const STACK_FAULT_SLACK: usize = 32;

/// A user process: one address space, one open-file table, one thread.
pub struct Process {
    tid: u64,
    page_table: Arc<SpinLock<Box<PageTableRoot>>>,
    vmas: Arc<VmaMap>,
    swap: Arc<SwapTable>,
    files: FileTable,
    /// This process's own post-mortem record; signaled as it exits.
    ashes: Arc<Ashes>,
    /// Direct children spawned via `exec`, consulted by `wait`.
    children: SpinLock<Vec<Arc<Ashes>>>,
}

impl Process {
    /// Spawns the very first process in the system, running `file` with
    /// `args`. Used once at boot; nothing ever waits on it.
    pub fn spawn_initial(file: RegularFile, args: &[&str]) -> Result<JoinHandle, KernelError> {
        let builder = ThreadBuilder::new(args.first().copied().unwrap_or("init"));
        let tid = builder.get_tid();
        let ashes = Ashes::new(tid);
        Self::spawn_with(builder, tid, file, args, ashes)
    }

    fn spawn_with(
        builder: ThreadBuilder,
        tid: u64,
        file: RegularFile,
        args: &[&str],
        ashes: Arc<Ashes>,
    ) -> Result<JoinHandle, KernelError> {
        let page_table = Arc::new(SpinLock::new(PageTableRoot::new_boxed_with_kernel_addr()));
        {
            let mut table = PROCESS_TABLE.lock();
            table.insert(tid, page_table.clone());
            table.unlock();
        }

        let vmas = Arc::new(VmaMap::new());
        let swap = swap_table();
        let load_result = {
            let mut root = page_table.lock();
            let result = loader::load(&GlobalOwners, &swap, &vmas, &mut root, tid, &file, args);
            root.unlock();
            result
        };

        let regs = match load_result {
            Ok(regs) => regs,
            Err(e) => {
                let mut table = PROCESS_TABLE.lock();
                table.remove(&tid);
                table.unlock();
                ashes.load_success.store(false, Ordering::SeqCst);
                ashes.load_done.signal();
                return Err(e);
            }
        };
        ashes.load_success.store(true, Ordering::SeqCst);
        ashes.load_done.signal();

        let process = Process {
            tid,
            page_table,
            vmas,
            swap,
            files: FileTable::new(),
            ashes,
            children: SpinLock::new(Vec::new()),
        };

        Ok(builder
            .attach_task(Box::new(process))
            .spawn(move || regs.launch()))
    }

    /// `pid_t exec(const char *cmdline)`: the first whitespace-separated
    /// token of `cmdline` is the executable path, the rest become `argv`.
    /// Blocks until the child's loader finishes, returning its pid on
    /// success or `-1` if the path doesn't exist or fails to load.
    fn exec(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let cmdline = UserCString::new(abi.arg1).read()?;
        let mut words = cmdline.split_whitespace();
        let path = words.next().ok_or(KernelError::InvalidArgument)?;
        let args: Vec<&str> = core::iter::once(path).chain(words).collect();

        let file = FileSystem::root()
            .open(path)?
            .into_regular_file()
            .ok_or(KernelError::IsDirectory)?;

        let builder = ThreadBuilder::new(path);
        let tid = builder.get_tid();
        let ashes = Ashes::new(tid);
        let handle = Self::spawn_with(builder, tid, file, &args, ashes.clone())?;

        {
            let mut children = self.children.lock();
            children.push(ashes.clone());
            children.unlock();
        }

        // Consumed once per child, never given back: re-arming this permit
        // would let a second `exec` through before this one's loader ever ran.
        core::mem::forget(ashes.load_done.wait());
        if ashes.load_success.load(Ordering::SeqCst) {
            Ok(handle.tid as usize)
        } else {
            Ok((-1isize) as usize)
        }
    }

    /// `int wait(pid_t pid)`: blocks until `pid`, a direct child that has
    /// not already been waited on, exits, then returns its exit status.
    /// Returns `-1` for any pid that is not such a child.
    fn wait(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let pid = abi.arg1 as u64;
        let ashes = {
            let children = self.children.lock();
            let found = children.iter().find(|a| a.child_tid == pid).cloned();
            children.unlock();
            found
        };
        let Some(ashes) = ashes else {
            return Ok((-1isize) as usize);
        };
        if ashes.waited.swap(true, Ordering::SeqCst) {
            return Ok((-1isize) as usize);
        }

        core::mem::forget(ashes.exit.wait());
        let status = ashes.exit_status();

        let mut children = self.children.lock();
        children.retain(|a| a.child_tid != pid);
        children.unlock();

        Ok((status as isize) as usize)
    }

    /// `void *mmap(int fd, void *addr)`: maps the whole file open at `fd`
    /// starting at `addr`, which must be non-null, page-aligned, and not
    /// already covered by another mapping.
    fn mmap(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let file = self.files.regular_file(abi.arg1 as i32)?;
        let addr = abi.arg2;
        if addr == 0 || addr % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument);
        }
        let size = file.size();
        if size == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let start = Va::new(addr).ok_or(KernelError::InvalidArgument)?;
        let end = Va::new((addr + size).div_ceil(PAGE_SIZE) * PAGE_SIZE)
            .ok_or(KernelError::InvalidArgument)?;
        if self.vmas.find(start).is_some() {
            return Err(KernelError::InvalidArgument);
        }
        self.vmas.insert(Arc::new(Vma::new(
            start,
            end,
            VmaBacking::Mmap { file, file_offset: 0 },
        )));
        Ok(addr)
    }

    /// `int munmap(void *addr)`: tears down the mapping installed at `addr`
    /// by `mmap`, writing back any dirty resident pages first.
    fn munmap(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let start = Va::new(abi.arg1).ok_or(KernelError::InvalidArgument)?;
        let vma = self.vmas.remove(start).ok_or(KernelError::InvalidArgument)?;
        let mut root = self.page_table.lock();
        for va in vma.tracked_pages() {
            match vma.status(va) {
                PageStatus::Resident => {
                    if let Some(page) = frame_table().remove(self.tid, va) {
                        if let VmaBacking::Mmap { file, file_offset } = &vma.backing {
                            let off = va.into_usize() as u64 - vma.start.into_usize() as u64;
                            let _ = file.write((*file_offset + off) as usize, page.inner());
                        }
                    }
                    if let Ok(mut slot) = vma::walk_or_create(&mut root, va) {
                        slot.unmap();
                    }
                    // SAFETY: the mapping for `va` is being torn down; any
                    // stale TLB entry for it must not survive.
                    unsafe {
                        core::arch::asm!("invlpg [{0}]", in(reg) va.into_usize(), options(nostack));
                    }
                }
                PageStatus::Swapped(slot) => self.swap.free(slot),
                PageStatus::Unmapped => {}
            }
        }
        root.unlock();
        Ok(0)
    }

    /// Extends the stack region downward to cover `fault_va`, if it looks
    /// like ordinary stack growth rather than a wild access: within
    /// [`STACK_FAULT_SLACK`] bytes of the observed `rsp`, and within
    /// [`MAX_STACK_SIZE`] of the stack's fixed top.
    fn maybe_grow_stack(&self, fault_va: Va) -> bool {
        let stack = match self
            .vmas
            .all()
            .into_iter()
            .find(|v| matches!(v.backing, VmaBacking::Anonymous) && v.end.into_usize() == loader::STACK_TOP)
        {
            Some(v) => v,
            None => return false,
        };
        let fa = fault_va.into_usize();
        if fa >= stack.start.into_usize() {
            return false;
        }
        let rsp = current_user_rsp().unwrap_or(fa);
        if fa + STACK_FAULT_SLACK < rsp {
            return false;
        }
        if loader::STACK_TOP - fa > MAX_STACK_SIZE {
            return false;
        }
        let new_start = match Va::new(fa & !(PAGE_SIZE - 1)) {
            Some(v) => v,
            None => return false,
        };
        match self.vmas.remove(stack.start) {
            Some(old) => {
                self.vmas.insert(Arc::new(Vma::new(new_start, old.end, VmaBacking::Anonymous)));
                true
            }
            None => false,
        }
    }

    /// Tears down this process's address-space bookkeeping and reports its
    /// exit status, then terminates the underlying thread. Never returns.
    fn do_exit(&mut self, status: i32) -> ! {
        self.ashes.set_exit_status(status);

        {
            let mut table = PROCESS_TABLE.lock();
            table.remove(&self.tid);
            table.unlock();
        }

        drop(frame_table().remove_all(self.tid));

        for vma in self.vmas.all() {
            for va in vma.tracked_pages() {
                if let PageStatus::Swapped(slot) = vma.status(va) {
                    self.swap.free(slot);
                }
            }
        }

        self.ashes.exit.signal();
        Current::exit(status)
    }
}

impl Task for Process {
    fn syscall(&mut self, registers: &mut Registers) {
        let abi = SyscallAbi::from_registers(registers);
        let sysno = abi.sysno;

        if sysno == SYS_HALT {
            crate::power::shutdown();
        }
        if sysno == SYS_EXIT {
            self.do_exit(abi.arg1 as i32);
        }

        frame_table().pin_all(self.tid);
        let result = match sysno {
            SYS_EXEC => self.exec(&abi),
            SYS_WAIT => self.wait(&abi),
            SYS_CREATE => self.files.create(&abi),
            SYS_REMOVE => self.files.remove(&abi),
            SYS_OPEN => self.files.open(&abi),
            SYS_FILESIZE => self.files.filesize(&abi),
            SYS_READ => self.files.read(&abi),
            SYS_WRITE => self.files.write(&abi),
            SYS_SEEK => self.files.seek(&abi),
            SYS_TELL => self.files.tell(&abi),
            SYS_CLOSE => self.files.close(&abi),
            SYS_MMAP => self.mmap(&abi),
            SYS_MUNMAP => self.munmap(&abi),
            SYS_PIPE => self.files.pipe(&abi),
            _ => Err(KernelError::NoSuchSyscall),
        };
        frame_table().unpin_all(self.tid);
        abi.set_return_value(result);
    }

    fn page_fault(&mut self, ec: PFErrorCode, cr2: Va) {
        let write = (ec & PFErrorCode::WRITE) == PFErrorCode::WRITE;
        let user_mode = (ec & PFErrorCode::USER) == PFErrorCode::USER;

        if !user_mode {
            panic!("Unexpected page fault in kernel at {cr2:?}");
        }

        if self.vmas.find(cr2).is_none() && !self.maybe_grow_stack(cr2) {
            self.do_exit(-1);
        }

        let mut root = self.page_table.lock();
        let result = page_fault::handle(&GlobalOwners, &self.swap, &self.vmas, &mut root, self.tid, cr2, write, true);
        root.unlock();
        if result.is_err() {
            self.do_exit(-1);
        }
    }

    fn access_ok(&self, addr: Range<Va>, _is_write: bool) -> bool {
        addr.start.into_usize() != 0 && self.vmas.find(addr.start).is_some()
    }

    fn with_page_table_pa(&self, f: &fn(Pa)) {
        let root = self.page_table.lock();
        let pa = root.pa();
        root.unlock();
        f(pa);
    }
}
