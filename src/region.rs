//! Shared mapping of a queue file.
//!
//! Every producer, consumer, and container attaches to a queue through its
//! own [`MappedRegion`]: the entire backing file mapped read-write and
//! shared, pre-populated so the fast path never takes a soft page fault.
//! The region hands out a raw base pointer; the queue engines perform the
//! header casts at their own narrow boundaries.

use std::os::fd::AsFd;
use std::ptr::{null_mut, NonNull};

use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

use crate::error::{QueueError, Result};
use crate::file::File;

/// Owned `mmap` region. Unmaps on drop; never touches shared queue state.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: The mapping refers to shared memory, not thread-local data, so
// the region may move between threads. It is deliberately not Sync: the
// queue handles built on top of it are single-role and take `&mut self`.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Maps the whole file, querying its current size.
    pub fn map(file: &File) -> Result<Self> {
        let len = file.size()?;
        Self::map_len(file, len)
    }

    /// Maps exactly `len` bytes of the file.
    pub fn map_len(file: &File, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(QueueError::posix("mmap", rustix::io::Errno::INVAL));
        }

        // SAFETY: We request a fresh mapping from the kernel (addr hint is
        // null), so it cannot alias any existing Rust object. The fd is
        // valid for the duration of the call; the mapping outlives it.
        let ptr = unsafe {
            mmap(
                null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED | MapFlags::POPULATE,
                file.as_fd(),
                0,
            )
        }
        .map_err(|err| QueueError::posix("mmap", err))?;

        // SAFETY: mmap never returns null on success.
        let ptr = unsafe { NonNull::new_unchecked(ptr.cast::<u8>()) };
        Ok(Self { ptr, len })
    }

    /// Base address of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the mapping is empty (never the case for a
    /// successfully constructed region).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe exactly the mapping created in map_len.
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_reflects_file_contents() {
        let file = File::anonymous("turboq-region-test").unwrap();
        file.truncate(4096).unwrap();

        let writer = MappedRegion::map(&file).unwrap();
        let reader = MappedRegion::map(&file).unwrap();
        assert_eq!(writer.len(), 4096);

        // Two mappings of the same file alias the same physical pages.
        unsafe {
            writer.as_ptr().write(0xAB);
            assert_eq!(reader.as_ptr().read(), 0xAB);
        }
    }

    #[test]
    fn test_map_empty_file_fails() {
        let file = File::anonymous("turboq-region-empty").unwrap();
        assert!(MappedRegion::map(&file).is_err());
    }
}
