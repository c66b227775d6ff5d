//! A process's open-file table: the map from small integer file descriptors
//! to what they actually refer to, plus the current working directory used
//! to resolve relative paths.

use crate::{
    KernelError,
    channel::{Receiver, Sender, channel},
    fs::{Directory, FileSystem, RegularFile},
    syscall::{
        SyscallAbi,
        flags::FileMode,
        uaccess::{UserCString, UserPtrWO, UserU8SliceRO, UserU8SliceWO},
    },
    teletype::Teletype,
};
use alloc::collections::btree_map::BTreeMap;

/// Descriptor table entries are bounded to what fits two 4096-byte pages of
/// bookkeeping, one descriptor's worth of state at a time.
const MAX_FILES: usize = 128;

/// What a single file descriptor refers to.
enum FileKind {
    Regular { file: RegularFile, position: usize },
    /// Standard input/output/error. `writable` is false only for fd 0.
    Stdio { writable: bool },
    /// The read end of a pipe.
    Rx(Receiver<u8>),
    /// The write end of a pipe.
    Tx(Sender<u8>),
}

struct File {
    mode: FileMode,
    kind: FileKind,
}

/// The open-file table attached to a [`super::Process`].
pub struct FileTable {
    cwd: Directory,
    files: BTreeMap<i32, File>,
}

impl FileTable {
    /// Creates a table with the standard three descriptors installed and
    /// `cwd` set to the filesystem root.
    pub fn new() -> Self {
        let mut files = BTreeMap::new();
        files.insert(
            0,
            File {
                mode: FileMode::Read,
                kind: FileKind::Stdio { writable: false },
            },
        );
        files.insert(
            1,
            File {
                mode: FileMode::Write,
                kind: FileKind::Stdio { writable: true },
            },
        );
        files.insert(
            2,
            File {
                mode: FileMode::Write,
                kind: FileKind::Stdio { writable: true },
            },
        );
        Self {
            cwd: FileSystem::root(),
            files,
        }
    }

    fn install(&mut self, mode: FileMode, kind: FileKind) -> Result<i32, KernelError> {
        if self.files.len() >= MAX_FILES {
            return Err(KernelError::TooManyOpenFile);
        }
        let mut fd = 0;
        while self.files.contains_key(&fd) {
            fd += 1;
        }
        self.files.insert(fd, File { mode, kind });
        Ok(fd)
    }

    fn get(&mut self, fd: i32) -> Result<&mut File, KernelError> {
        self.files.get_mut(&fd).ok_or(KernelError::BadFileDescriptor)
    }

    /// `int create(const char *path, bool is_dir)`.
    pub fn create(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let path = UserCString::new(abi.arg1).read()?;
        let is_dir = abi.arg2 != 0;
        self.cwd.create(&path, is_dir)?;
        Ok(0)
    }

    /// `int remove(const char *path)`.
    pub fn remove(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let path = UserCString::new(abi.arg1).read()?;
        self.cwd.unlink(&path)?;
        Ok(0)
    }

    /// `int open(const char *path, int mode)`.
    pub fn open(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let path = UserCString::new(abi.arg1).read()?;
        let mode = match abi.arg2 {
            0 => FileMode::Read,
            1 => FileMode::Write,
            2 => FileMode::ReadWrite,
            _ => return Err(KernelError::InvalidArgument),
        };
        let file = self
            .cwd
            .open(&path)?
            .into_regular_file()
            .ok_or(KernelError::IsDirectory)?;
        let fd = self.install(mode, FileKind::Regular { file, position: 0 })?;
        Ok(fd as usize)
    }

    /// Returns a clone of the regular file open at `fd`, for `mmap` to map
    /// directly rather than going through a read/write syscall.
    pub fn regular_file(&mut self, fd: i32) -> Result<RegularFile, KernelError> {
        match &self.get(fd)?.kind {
            FileKind::Regular { file, .. } => Ok(file.clone()),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// `int filesize(int fd)`.
    pub fn filesize(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        match &self.get(abi.arg1 as i32)?.kind {
            FileKind::Regular { file, .. } => Ok(file.size()),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// `ssize_t read(int fd, void *buf, size_t count)`.
    pub fn read(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let entry = self.get(abi.arg1 as i32)?;
        if entry.mode == FileMode::Write {
            return Err(KernelError::OperationNotPermitted);
        }
        let count = abi.arg3;
        match &mut entry.kind {
            FileKind::Regular { file, position } => {
                let mut buf = alloc::vec![0u8; count];
                let n = file.read(*position, &mut buf)?;
                *position += n;
                UserU8SliceWO::new(abi.arg2, n).put(&buf[..n])
            }
            FileKind::Stdio { writable: false } => {
                let mut buf = alloc::vec![0u8; count];
                let mut serial = crate::teletype::serial().lock();
                let n = serial.read(&mut buf)?;
                serial.unlock();
                UserU8SliceWO::new(abi.arg2, n).put(&buf[..n])
            }
            FileKind::Rx(rx) => {
                let mut buf = alloc::vec::Vec::with_capacity(count);
                while buf.len() < count {
                    match rx.recv() {
                        crate::channel::Recv::Item(b) => buf.push(b),
                        crate::channel::Recv::Eof => break,
                    }
                }
                let n = buf.len();
                UserU8SliceWO::new(abi.arg2, n).put(&buf)
            }
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// `ssize_t write(int fd, const void *buf, size_t count)`.
    pub fn write(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let buf = UserU8SliceRO::new(abi.arg2, abi.arg3).get()?;
        let entry = self.get(abi.arg1 as i32)?;
        if entry.mode == FileMode::Read {
            return Err(KernelError::OperationNotPermitted);
        }
        match &mut entry.kind {
            FileKind::Regular { file, position } => {
                let n = file.write(*position, &buf)?;
                *position += n;
                Ok(n)
            }
            FileKind::Stdio { writable: true } => {
                let mut serial = crate::teletype::serial().lock();
                let n = serial.write(&buf)?;
                serial.unlock();
                Ok(n)
            }
            FileKind::Tx(tx) => {
                for b in &buf {
                    tx.send(*b);
                }
                Ok(buf.len())
            }
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// `off_t seek(int fd, off_t offset, int whence)`. `whence` follows the
    /// usual `SEEK_SET`/`SEEK_CUR`/`SEEK_END` (0/1/2) convention.
    pub fn seek(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let entry = self.get(abi.arg1 as i32)?;
        match &mut entry.kind {
            FileKind::Regular { file, position } => {
                let offset = abi.arg2 as isize;
                let base = match abi.arg3 {
                    0 => 0isize,
                    1 => *position as isize,
                    2 => file.size() as isize,
                    _ => return Err(KernelError::InvalidArgument),
                };
                let new_position = base.checked_add(offset).ok_or(KernelError::InvalidArgument)?;
                if new_position < 0 {
                    return Err(KernelError::InvalidArgument);
                }
                *position = new_position as usize;
                Ok(*position)
            }
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// `off_t tell(int fd)`.
    pub fn tell(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        match &self.get(abi.arg1 as i32)?.kind {
            FileKind::Regular { position, .. } => Ok(*position),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    /// `int close(int fd)`.
    pub fn close(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        self.files
            .remove(&(abi.arg1 as i32))
            .ok_or(KernelError::BadFileDescriptor)?;
        Ok(0)
    }

    /// `int pipe(int pipefd[2])`: installs a connected receive/send pair and
    /// writes `[rx_fd, tx_fd]` back to `pipefd`.
    pub fn pipe(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let (tx, rx) = channel::<u8>();
        let rx_fd = self.install(FileMode::Read, FileKind::Rx(rx))?;
        let tx_fd = match self.install(FileMode::Write, FileKind::Tx(tx)) {
            Ok(fd) => fd,
            Err(e) => {
                self.files.remove(&rx_fd);
                return Err(e);
            }
        };
        UserPtrWO::<[i32; 2]>::new(abi.arg1).put([rx_fd, tx_fd])?;
        Ok(0)
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}
