//! System call infrastructure.
use crate::KernelError;
use crate::thread::with_current;
pub use abyss::interrupt::Registers;
use abyss::x86_64::PrivilegeLevel;

pub mod uaccess;

/// Decoded arguments of one `syscall` trap, plus a handle back to the
/// trapped registers so a handler can report a return value.
///
/// Follows the SysV-ish convention the `syscall` instruction trap uses
/// here: the call number arrives in `rax`, up to six arguments in `rdi`,
/// `rsi`, `rdx`, `r10`, `r8`, `r9` (`r10` standing in for `rcx`, which the
/// `syscall` instruction itself clobbers), and the return value is written
/// back into `rax`.
pub struct SyscallAbi<'a> {
    /// The syscall number, read from `rax` at trap time.
    pub sysno: usize,
    /// First argument (`rdi`).
    pub arg1: usize,
    /// Second argument (`rsi`).
    pub arg2: usize,
    /// Third argument (`rdx`).
    pub arg3: usize,
    /// Fourth argument (`r10`).
    pub arg4: usize,
    /// Fifth argument (`r8`).
    pub arg5: usize,
    /// Sixth argument (`r9`).
    pub arg6: usize,
    regs: &'a mut Registers,
}

impl<'a> SyscallAbi<'a> {
    /// Decodes a syscall ABI frame out of the trapped `regs`.
    pub fn from_registers(regs: &'a mut Registers) -> Self {
        let gprs = &regs.gprs;
        Self {
            sysno: gprs.rax,
            arg1: gprs.rdi,
            arg2: gprs.rsi,
            arg3: gprs.rdx,
            arg4: gprs.r10,
            arg5: gprs.r8,
            arg6: gprs.r9,
            regs,
        }
    }

    /// Writes `return_val` back into `rax`: the value itself on success, or
    /// the error's negative errno encoding on failure.
    pub fn set_return_value(self, return_val: Result<usize, KernelError>) {
        self.regs.gprs.rax = match return_val {
            Ok(v) => v,
            Err(e) => e.into_usize(),
        };
    }
}

#[doc(hidden)]
#[unsafe(no_mangle)]
pub extern "C" fn do_handle_syscall(frame: &mut Registers) {
    with_current(|th| match th.task.as_mut() {
        Some(task) => {
            task.syscall(frame);
        }
        _ => {
            panic!("Unexpected `syscall` instruction.")
        }
    });

    if frame.interrupt_stack_frame.cs.dpl() == PrivilegeLevel::Ring3 {
        crate::thread::__check_for_signal();
    }
}

/// Flags for system calls.
pub mod flags {
    /// The [`FileMode`] enum represents the access modes available when opening
    /// a file.
    ///
    /// This enum is used by user program to specify how a file is opened,
    /// determining which operations can be performed on the file. It
    /// defines three basic modes:
    /// - [`FileMode::Read`]: The file is opened for reading only.
    /// - [`FileMode::Write`]: The file is opened for writing only.
    /// - [`FileMode::ReadWrite`]: The file is opened for both reading and
    ///   writing.
    ///
    /// These modes are used to control how the file descriptor behaves when
    /// interacting with the file (e.g., reading, writing, or both).
    #[derive(Debug, PartialEq, PartialOrd, Ord, Eq, Clone, Copy)]
    pub enum FileMode {
        /// Read-only access to the file.
        ///
        /// In this mode, the file can only be read from, and no changes can be
        /// made to the file's contents.
        Read = 0,

        /// Write-only access to the file.
        ///
        /// In this mode, the file can only be written to, and any existing
        /// content in the file is overwritten with new data.
        Write = 1,

        /// Both Read and Write access to the file.
        ///
        /// In this mode, the file can both be read and written, and does NOT
        /// removes existing content, but can be overwritten with new
        /// data.
        ReadWrite = 2,
    }
}
