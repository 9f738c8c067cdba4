//! Queue role interfaces and typed byte-copy helpers.
//!
//! The three queue kinds share an interface shape without runtime
//! dispatch: producers expose `prepare`/`commit`, consumers expose
//! `fetch`/`consume`/`reset`. The [`Producer`] and [`Consumer`] traits
//! capture that shape so the typed [`enqueue`]/[`dequeue`]/[`fetch`]
//! helpers can be generic over all engines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytemuck::{AnyBitPattern, NoUninit};

use crate::error::{QueueError, Result};
use crate::file::File;

pub mod mpsc;
pub mod spmc;
pub mod spsc;

/// Write end of a queue.
///
/// All operations are non-blocking: when the queue cannot accept a
/// message, `prepare` returns `None` and the caller decides whether to
/// spin, yield, sleep, or drop.
///
/// # Abandoned reservations
///
/// A prepared span that is never committed stays reserved for the
/// lifetime of the producer handle. In the byte-packed rings (SPSC, SPMC)
/// the producer's cursor has already moved past it, so the bytes are
/// never reclaimed; in the MPSC ring the slot stays orphaned until the
/// consumer calls `reset()` or the queue is destroyed.
pub trait Producer {
    /// Reserves a contiguous writable span of `size` bytes without making
    /// it visible to consumers. Returns `None` on backpressure.
    fn prepare(&mut self, size: usize) -> Option<&mut [u8]>;

    /// Publishes the span exactly as prepared.
    fn commit(&mut self);

    /// Publishes a narrower span.
    ///
    /// # Panics
    ///
    /// Panics if `size` exceeds the prepared payload size.
    fn commit_sized(&mut self, size: usize);
}

/// Read end of a queue.
pub trait Consumer {
    /// Returns the next readable message payload, or `None` when no
    /// message is available.
    fn fetch(&mut self) -> Option<&[u8]>;

    /// Releases the last fetched message back to the producer.
    fn consume(&mut self);

    /// Drops all currently visible messages.
    fn reset(&mut self);
}

/// Writes `value` as a plain bit-pattern into the queue.
///
/// Returns `false` when the queue is full.
pub fn enqueue<P: Producer, T: NoUninit>(producer: &mut P, value: T) -> bool {
    match producer.prepare(std::mem::size_of::<T>()) {
        Some(buffer) => {
            buffer.copy_from_slice(bytemuck::bytes_of(&value));
            producer.commit();
            true
        }
        None => false,
    }
}

/// Reads the next message into `out` and releases it.
///
/// Returns `false` when the queue is empty. The payload must be exactly
/// `size_of::<T>()` bytes, i.e. written by the matching [`enqueue`].
pub fn dequeue<C: Consumer, T: AnyBitPattern>(consumer: &mut C, out: &mut T) -> bool {
    match consumer.fetch() {
        Some(buffer) => {
            *out = bytemuck::pod_read_unaligned(buffer);
            consumer.consume();
            true
        }
        None => false,
    }
}

/// Reads the next message into `out` without releasing it (peek).
pub fn fetch<C: Consumer, T: AnyBitPattern>(consumer: &mut C, out: &mut T) -> bool {
    match consumer.fetch() {
        Some(buffer) => {
            *out = bytemuck::pod_read_unaligned(buffer);
            true
        }
        None => false,
    }
}

/// Ownership token for a queue's singleton role.
///
/// Cross-process exclusion comes from the advisory exclusive lock on the
/// backing file. Because `flock` is per open-file-description, a second
/// acquisition through the *same* container would succeed, so the
/// container additionally carries an in-process flag. The guard holds a
/// dup of the container's descriptor (sharing the locked description) and
/// releases both on drop, allowing the role to be re-created after the
/// handle goes away.
#[derive(Debug)]
pub(crate) struct RoleGuard {
    file: File,
    held: Arc<AtomicBool>,
}

impl RoleGuard {
    pub(crate) fn acquire(file: &File, held: &Arc<AtomicBool>, role: &'static str) -> Result<Self> {
        if held.swap(true, Ordering::AcqRel) {
            return Err(QueueError::RoleBusy { role });
        }
        match file.try_lock() {
            Ok(true) => {}
            Ok(false) => {
                held.store(false, Ordering::Release);
                return Err(QueueError::RoleBusy { role });
            }
            Err(err) => {
                held.store(false, Ordering::Release);
                return Err(err);
            }
        }
        let file = match file.try_clone() {
            Ok(file) => file,
            Err(err) => {
                let _ = file.unlock();
                held.store(false, Ordering::Release);
                return Err(err);
            }
        };
        Ok(Self {
            file,
            held: Arc::clone(held),
        })
    }
}

impl Drop for RoleGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        self.held.store(false, Ordering::Release);
    }
}
