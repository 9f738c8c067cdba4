//! File descriptor wrapper used to back queue mappings.
//!
//! A queue is backed by a regular file on a tmpfs/hugetlbfs mount or by an
//! anonymous memfd. This module owns the descriptor-level operations the
//! containers need: open-or-create with the creation race handled, size
//! query, truncation, and the advisory whole-file lock that enforces
//! singleton roles.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::Path;

use rustix::fs::{self, FlockOperation, Mode, OFlags};
use rustix::io::Errno;

use crate::error::{QueueError, Result};

/// Owned file descriptor with queue-oriented helpers.
#[derive(Debug)]
pub struct File {
    fd: OwnedFd,
}

const RW_FLAGS: OFlags = OFlags::RDWR.union(OFlags::CLOEXEC);

fn default_mode() -> Mode {
    // 0666; the umask narrows it.
    Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH | Mode::WOTH
}

impl File {
    /// Opens an existing file read-write.
    pub fn open(path: &Path) -> Result<Self> {
        let fd = fs::open(path, RW_FLAGS, Mode::empty())
            .map_err(|err| QueueError::posix("open", err))?;
        Ok(Self { fd })
    }

    /// Opens `path` read-write, creating it if it does not exist.
    ///
    /// Creation uses `O_CREAT | O_EXCL` and falls back to a plain open on
    /// `EEXIST`, retrying when the file vanishes between the two calls
    /// (another process may unlink it concurrently).
    pub fn open_or_create(path: &Path) -> Result<Self> {
        let mode = default_mode();
        loop {
            match fs::open(path, RW_FLAGS | OFlags::CREATE | OFlags::EXCL, mode) {
                Ok(fd) => {
                    // O_CREAT applies the umask; restore the requested mode.
                    let _ = fs::fchmod(&fd, mode);
                    return Ok(Self { fd });
                }
                Err(Errno::EXIST) => match fs::open(path, RW_FLAGS, Mode::empty()) {
                    Ok(fd) => return Ok(Self { fd }),
                    Err(Errno::NOENT) => continue,
                    Err(err) => return Err(QueueError::posix("open", err)),
                },
                Err(err) => return Err(QueueError::posix("open", err)),
            }
        }
    }

    /// Creates an anonymous in-memory file (`memfd_create`).
    ///
    /// The file has no name in any filesystem; it lives as long as a
    /// descriptor or mapping refers to it.
    pub fn anonymous(name: &str) -> Result<Self> {
        let fd = fs::memfd_create(name, fs::MemfdFlags::CLOEXEC)
            .map_err(|err| QueueError::posix("memfd_create", err))?;
        Ok(Self { fd })
    }

    /// Duplicates the descriptor. The duplicate shares the open file
    /// description, including any advisory lock held on it.
    pub fn try_clone(&self) -> Result<Self> {
        let fd = rustix::io::fcntl_dupfd_cloexec(&self.fd, 0)
            .map_err(|err| QueueError::posix("dup", err))?;
        Ok(Self { fd })
    }

    /// Attempts to take the advisory exclusive whole-file lock without
    /// blocking. Returns `false` when another open file description
    /// already holds it.
    pub fn try_lock(&self) -> Result<bool> {
        match flock_no_int(self.fd.as_fd(), FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => Ok(true),
            Err(Errno::WOULDBLOCK) => Ok(false),
            Err(err) => Err(QueueError::posix("flock", err)),
        }
    }

    /// Releases the advisory lock.
    pub fn unlock(&self) -> Result<()> {
        flock_no_int(self.fd.as_fd(), FlockOperation::Unlock)
            .map_err(|err| QueueError::posix("flock", err))
    }

    /// Returns the current file size in bytes.
    pub fn size(&self) -> Result<usize> {
        let stat = fs::fstat(&self.fd).map_err(|err| QueueError::posix("fstat", err))?;
        Ok(stat.st_size as usize)
    }

    /// Resizes the file to exactly `size` bytes. Newly extended bytes read
    /// as zero, which the queue initializers rely on for their counters.
    pub fn truncate(&self, size: usize) -> Result<()> {
        fs::ftruncate(&self.fd, size as u64).map_err(|err| QueueError::posix("ftruncate", err))
    }
}

impl AsFd for File {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// `flock` restarted on EINTR.
fn flock_no_int(fd: BorrowedFd<'_>, op: FlockOperation) -> rustix::io::Result<()> {
    loop {
        match fs::flock(fd, op) {
            Err(Errno::INTR) => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_truncate_and_size() {
        let file = File::anonymous("turboq-test").unwrap();
        assert_eq!(file.size().unwrap(), 0);
        file.truncate(8192).unwrap();
        assert_eq!(file.size().unwrap(), 8192);
    }

    #[test]
    fn test_lock_is_exclusive_across_descriptions() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("turboq-flock-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let first = File::open_or_create(&path).unwrap();
        let second = File::open(&path).unwrap();

        assert!(first.try_lock().unwrap());
        // A separate open file description must be excluded.
        assert!(!second.try_lock().unwrap());

        first.unlock().unwrap();
        assert!(second.try_lock().unwrap());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_dup_shares_lock_ownership() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("turboq-flock-dup-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let original = File::open_or_create(&path).unwrap();
        let other = File::open(&path).unwrap();

        assert!(original.try_lock().unwrap());
        let dup = original.try_clone().unwrap();

        // Unlocking through the duplicate releases the shared description's lock.
        dup.unlock().unwrap();
        assert!(other.try_lock().unwrap());

        let _ = std::fs::remove_file(&path);
    }
}
