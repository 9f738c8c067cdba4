//! Error type shared by the whole crate.
//!
//! Only hard conditions surface here: attachment failures, invalid
//! creation options, singleton-role violations, and syscall errors. Soft
//! conditions (queue full on the producer side, queue empty on the
//! consumer side) are never errors; they are reported in-band as empty
//! results (`None` / `false`).

use thiserror::Error;

use rustix::io::Errno;

/// Result alias used across the crate.
pub type Result<T, E = QueueError> = std::result::Result<T, E>;

/// Contextual errors produced by queue construction and role creation.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A syscall failed with an errno.
    #[error("{op} failed: {source}")]
    Posix {
        /// The failing operation, e.g. `"open"`, `"mmap"`.
        op: &'static str,
        source: Errno,
    },

    /// The mapped region is not a queue of the expected kind: the tag
    /// bytes do not match, or the file is too small to hold one.
    #[error("not a valid {expected} queue (bad tag or truncated file)")]
    InvalidQueue {
        /// Tag of the expected queue kind, e.g. `"turboq/SPSC"`.
        expected: &'static str,
    },

    /// An existing queue file does not match the size recomputed from the
    /// supplied creation options.
    #[error("queue size mismatch: options imply {expected} bytes, file has {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A creation option failed validation.
    #[error("invalid creation options: {0}")]
    InvalidOptions(&'static str),

    /// The singleton role for this queue kind is already held.
    #[error("a {role} already exists for this queue")]
    RoleBusy {
        /// `"consumer"` for SPSC/MPSC, `"producer"` for SPMC.
        role: &'static str,
    },

    /// No usable tmpfs/hugetlbfs mount point was found for the requested
    /// hugepage option.
    #[error("no suitable memory mount point found")]
    NoMountPoint,
}

impl QueueError {
    pub(crate) fn posix(op: &'static str, source: Errno) -> Self {
        Self::Posix { op, source }
    }
}
