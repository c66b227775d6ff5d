//! Just enough 64-bit ELF parsing to load an executable: the file header and
//! its program header table, which is all [`super::loader`] needs to find
//! `PT_LOAD` segments and the entry point.

use crate::{KernelError, fs::RegularFile, mm::page_table::Permission};
use alloc::vec::Vec;

const MAGIC: [u8; 4] = *b"\x7fELF";
const CLASS_64BIT: u8 = 2;
const DATA_LITTLE_ENDIAN: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 0x3e;
const PHENT_SIZE: usize = 0x38;

#[repr(C)]
#[derive(Clone, Copy)]
struct ELFHeader {
    magic: [u8; 4],
    class: u8,
    data: u8,
    version: u8,
    abi: u8,
    abi_version: u8,
    pad: [u8; 7],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

bitflags::bitflags! {
    /// ELF's own segment permission bits. Bit order differs from the
    /// kernel's [`Permission`], so [`Phdr::permission`] translates between
    /// the two rather than reusing the raw value.
    struct PFlags: u32 {
        const EXECUTABLE = 1 << 0;
        const WRITE = 1 << 1;
        const READ = 1 << 2;
    }
}

/// A program header's segment type. Only `Load` segments matter for loading
/// an executable; everything else is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PType {
    /// `PT_LOAD`: a segment to be mapped into the address space.
    Load,
    /// Any other segment type (`PT_DYNAMIC`, `PT_NOTE`, ...), left unmapped.
    Other(u32),
}

/// One parsed program header entry.
pub struct Phdr {
    /// This segment's type.
    pub type_: PType,
    flags: PFlags,
    /// Offset of the segment's contents within the file.
    pub offset: u64,
    /// Virtual address the segment is loaded at.
    pub vaddr: u64,
    /// Size of the segment's contents within the file.
    pub filesz: u64,
    /// Size of the segment in memory, `>= filesz`; the tail is BSS.
    pub memsz: u64,
}

impl Phdr {
    /// Translates this segment's ELF permission bits into the kernel's own
    /// [`Permission`] flags, always including `USER` since loaded segments
    /// live in a user address space.
    pub fn permission(&self) -> Permission {
        let mut perm = Permission::USER;
        if self.flags.contains(PFlags::READ) {
            perm |= Permission::READ;
        }
        if self.flags.contains(PFlags::WRITE) {
            perm |= Permission::WRITE;
        }
        if self.flags.contains(PFlags::EXECUTABLE) {
            perm |= Permission::EXECUTABLE;
        }
        perm
    }
}

/// A validated ELF executable, still backed by its file for on-demand
/// program header and segment reads.
pub struct Elf {
    header: ELFHeader,
    file: RegularFile,
}

impl Elf {
    /// Validates the header and returns a parsed handle, or `None` if `file`
    /// is not a little-endian, 64-bit, `x86_64` executable.
    pub fn from_file(file: RegularFile) -> Option<Self> {
        let mut buf = [0u8; core::mem::size_of::<ELFHeader>()];
        file.read(0, &mut buf).ok()?;
        // SAFETY: `ELFHeader` is `repr(C)` and plain-old-data; every bit
        // pattern read from the file is a valid instance.
        let header: ELFHeader = unsafe { core::ptr::read(buf.as_ptr() as *const ELFHeader) };
        if header.magic != MAGIC
            || header.class != CLASS_64BIT
            || header.data != DATA_LITTLE_ENDIAN
            || header.e_type != ET_EXEC
            || header.e_machine != EM_X86_64
        {
            return None;
        }
        Some(Self { header, file })
    }

    /// The program's entry point.
    pub fn entry(&self) -> u64 {
        self.header.e_entry
    }

    /// Reads and returns every program header entry, in file order.
    pub fn phdrs(&self) -> Result<Vec<Phdr>, KernelError> {
        let mut out = Vec::with_capacity(self.header.e_phnum as usize);
        for i in 0..self.header.e_phnum as u64 {
            let mut raw = [0u8; PHENT_SIZE];
            let off = self.header.e_phoff + i * PHENT_SIZE as u64;
            self.file.read(off as usize, &mut raw)?;
            let p_type = u32::from_ne_bytes(raw[0..4].try_into().unwrap());
            let p_flags = u32::from_ne_bytes(raw[4..8].try_into().unwrap());
            let p_offset = u64::from_ne_bytes(raw[8..16].try_into().unwrap());
            let p_vaddr = u64::from_ne_bytes(raw[16..24].try_into().unwrap());
            let p_filesz = u64::from_ne_bytes(raw[32..40].try_into().unwrap());
            let p_memsz = u64::from_ne_bytes(raw[40..48].try_into().unwrap());
            out.push(Phdr {
                type_: if p_type == 1 {
                    PType::Load
                } else {
                    PType::Other(p_type)
                },
                flags: PFlags::from_bits_truncate(p_flags),
                offset: p_offset,
                vaddr: p_vaddr,
                filesz: p_filesz,
                memsz: p_memsz,
            });
        }
        Ok(out)
    }
}
