//! Thin wrappers over the OS memory-protection primitives.

use std::{io, ptr, ptr::NonNull};

use libc::c_void;

/// The three access levels the emulation can express on a logical page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    None,
    Read,
    ReadWrite,
}

impl Protection {
    fn flags(&self) -> libc::c_int {
        match self {
            Protection::None => libc::PROT_NONE,
            Protection::Read => libc::PROT_READ,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

pub fn os_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Anonymous mapping that backs the logical region. Starts with no access.
#[derive(Debug)]
pub struct LogicalMapping {
    base: NonNull<u8>,
    len: usize,
}

impl LogicalMapping {
    pub fn map(len: usize) -> io::Result<Self> {
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let base = NonNull::new(addr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(Self { base, len })
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of `addr` inside the mapping, if it falls inside it.
    pub fn offset_of(&self, addr: usize) -> Option<usize> {
        let start = self.base.as_ptr() as usize;
        if addr >= start && addr < start + self.len {
            Some(addr - start)
        } else {
            None
        }
    }

    /// Raw pointer `offset` bytes into the mapping. Dereferencing it is subject
    /// to the current protection of that page.
    pub fn ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset < self.len);
        unsafe { self.base.as_ptr().add(offset) }
    }

    pub fn protect(&self, offset: usize, len: usize, protection: Protection) -> io::Result<()> {
        let rc = unsafe {
            libc::mprotect(
                self.ptr_at(offset) as *mut c_void,
                len,
                protection.flags(),
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn protect_all(&self, protection: Protection) -> io::Result<()> {
        self.protect(0, self.len, protection)
    }
}

impl Drop for LogicalMapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut c_void, self.len);
        }
    }
}
