//! Composite memory mapping: a single virtual address region stitched together from
//! multiple file descriptors at distinct physical offsets, placed with `MAP_FIXED`.
//!
//! `memmap2` deliberately isn't used here: its safe `Mmap` type owns exactly one
//! mapping with no placement control, and this needs `MAP_FIXED` re-placement into an
//! already-reserved region (spec.md §4.D). That's the raw syscall layer's job.

use std::io;
use std::os::unix::io::RawFd;

/// A reserved virtual address range, progressively filled in with `MAP_FIXED`
/// sub-mappings as a vnode's data segments grow.
pub struct CompositeMap {
    ptr: *mut libc::c_void,
    size: usize,
}

impl CompositeMap {
    /// Reserves `size` bytes of address space, backed initially by `(fd, offset)`.
    /// Later segments are placed into this same region with [`place`](Self::place).
    pub fn create(fd: RawFd, offset: u64, size: usize) -> io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(CompositeMap { ptr, size })
    }

    /// Places `phys_size` bytes from `(fd, phys_offset)` at `logical_offset` within
    /// this region, overwriting whatever was mapped there before.
    pub fn place(&mut self, logical_offset: usize, fd: RawFd, phys_offset: u64, phys_size: usize) -> io::Result<()> {
        debug_assert!(logical_offset + phys_size <= self.size);
        let target = unsafe { (self.ptr as *mut u8).add(logical_offset) as *mut libc::c_void };
        let ptr = unsafe {
            libc::mmap(
                target,
                phys_size,
                libc::PROT_READ,
                libc::MAP_PRIVATE | libc::MAP_FIXED,
                fd,
                phys_offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Borrows the first `len` bytes of the region. Callers are responsible for
    /// keeping `len` within the logical file size that backs this map.
    pub fn as_slice(&self, len: usize) -> &[u8] {
        debug_assert!(len <= self.size);
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, len) }
    }
}

impl Drop for CompositeMap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.size);
        }
    }
}

// The mapping is read-only and never aliases Rust-managed memory, so it's safe to
// move and share across threads like any other handle to kernel-owned memory.
unsafe impl Send for CompositeMap {}
unsafe impl Sync for CompositeMap {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn create_then_read_matches_file_contents() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"hello world").unwrap();

        let map = CompositeMap::create(file.as_raw_fd(), 0, 4096).unwrap();
        assert_eq!(&map.as_slice(11)[..], b"hello world");
    }

    #[test]
    fn place_overlays_a_second_segment() {
        let mut first = tempfile::tempfile().unwrap();
        first.write_all(&[b'A'; 4096]).unwrap();
        let mut second = tempfile::tempfile().unwrap();
        second.write_all(b"BBBB").unwrap();

        let mut map = CompositeMap::create(first.as_raw_fd(), 0, 8192).unwrap();
        map.place(4096, second.as_raw_fd(), 0, 4).unwrap();

        let slice = map.as_slice(4100);
        assert_eq!(&slice[0..4], b"AAAA");
        assert_eq!(&slice[4096..4100], b"BBBB");
    }
}
