//! Bounded SPMC (single producer, multiple consumers) broadcast queue over
//! a shared file mapping.
//!
//! Same ring layout and message-header format as the SPSC queue, with two
//! differences:
//!
//! 1. There is no shared consumer position. The producer never waits for
//!    consumers; it writes freely, overwriting old data. Each consumer
//!    either keeps up or is lapped.
//! 2. Consumers are stateless relative to shared memory. A consumer's
//!    cursors live in its own process and are initialized to the current
//!    producer position at attach time, so a new consumer starts at the
//!    live edge and sees only messages committed after it attached.
//!
//! # Overrun hazard
//!
//! Because the producer does not coordinate with consumers, a slow
//! consumer can be overrun: the bytes of a fetched message may be
//! overwritten while the consumer is still reading them, and a cursor can
//! land on a position the producer has since reused. The queue does not
//! detect this; callers that need drop detection must encode a sequence
//! number inside the payload. What the implementation does guarantee is
//! memory safety: header fields read from an overrun position are
//! validated against the region bounds, and an implausible header makes
//! the consumer resynchronize to the live edge and report empty.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::detail::{align_up, CacheAligned, CACHE_LINE_SIZE};
use crate::error::{QueueError, Result};
use crate::file::File;
use crate::queue::RoleGuard;
use crate::region::MappedRegion;
use crate::source::{MemorySource, OpenFlags};
use crate::trace;

/// Queue-kind tag, present verbatim at offset 0 of the backing file.
const TAG: [u8; 11] = *b"turboq/SPMC";
const TAG_STR: &str = "turboq/SPMC";

/// Control struct at the start of the queue file.
#[repr(C)]
struct MemoryHeader {
    /// Placeholder for queue tag.
    tag: [u8; TAG.len()],
    /// Producer position (byte offset into the payload area).
    producer_pos: CacheAligned<AtomicUsize>,
}

/// Control struct embedded in the payload area before each message.
#[repr(C)]
#[derive(Clone, Copy)]
struct MessageHeader {
    /// Aligned message footprint minus the header itself, in bytes.
    size: usize,
    /// Absolute byte offset of the payload inside the payload area.
    payload_offset: usize,
    /// Current payload length in bytes.
    payload_size: usize,
}

const HEADER_SIZE: usize = std::mem::size_of::<MessageHeader>();

/// Offset of the first message header from the start of the file.
const DATA_START: usize = align_up(std::mem::size_of::<MemoryHeader>(), CACHE_LINE_SIZE);

/// Smallest file that can hold the header plus one wrapped message.
const MIN_BUFFER_SIZE: usize = DATA_START + 2 * CACHE_LINE_SIZE;

#[inline]
const fn align_buffer_size(value: usize) -> usize {
    align_up(value, CACHE_LINE_SIZE)
}

/// Returns `true` if the region holds a valid SPMC queue.
fn check(region: &MappedRegion) -> bool {
    if region.len() < MIN_BUFFER_SIZE {
        return false;
    }
    // SAFETY: the length check guarantees a full MemoryHeader is mapped.
    let header = unsafe { &*region.as_ptr().cast::<MemoryHeader>() };
    header.tag == TAG
}

/// Initializes a freshly truncated queue file.
fn init(region: &MappedRegion) {
    // SAFETY: the caller mapped at least MIN_BUFFER_SIZE bytes of a file it
    // just created, so no other process can observe the partial write.
    unsafe {
        region.as_ptr().cast::<MemoryHeader>().write(MemoryHeader {
            tag: TAG,
            producer_pos: CacheAligned(AtomicUsize::new(0)),
        });
    }
}

/// Creation options for [`BoundedSpmcQueue`].
#[derive(Debug, Clone, Copy)]
pub struct CreationOptions {
    /// Requested file size in bytes; rounded up to the source's page size.
    pub capacity_hint: usize,
}

/// Bounded SPMC broadcast queue container.
///
/// The producer is the singleton role: the first
/// [`create_producer`](Self::create_producer) takes the advisory exclusive
/// lock on the backing file. Consumers are unrestricted.
#[derive(Debug)]
pub struct BoundedSpmcQueue {
    file: File,
    producer_held: Arc<AtomicBool>,
}

impl BoundedSpmcQueue {
    /// Attaches to an existing queue. Fails when the file is missing or is
    /// not an SPMC queue.
    pub fn open(name: &str, source: &dyn MemorySource) -> Result<Self> {
        let (file, _page_size) = source.open(name, OpenFlags::OpenOnly)?;
        let region = MappedRegion::map(&file)?;
        if !check(&region) {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }
        trace::debug!(name, "attached SPMC queue");
        Ok(Self::from_file(file))
    }

    /// Attaches to a queue, creating and initializing it if missing.
    ///
    /// When the file already exists its size must equal the size
    /// recomputed from `options`.
    pub fn open_or_create(
        name: &str,
        options: CreationOptions,
        source: &dyn MemorySource,
    ) -> Result<Self> {
        if options.capacity_hint < DATA_START {
            return Err(QueueError::InvalidOptions(
                "capacity hint smaller than the queue header",
            ));
        }
        let (file, page_size) = source.open(name, OpenFlags::OpenOrCreate)?;
        let capacity = align_up(options.capacity_hint, page_size);

        let file_size = file.size()?;
        if file_size != 0 {
            if file_size != capacity {
                return Err(QueueError::SizeMismatch {
                    expected: capacity,
                    actual: file_size,
                });
            }
            let region = MappedRegion::map(&file)?;
            if !check(&region) {
                return Err(QueueError::InvalidQueue { expected: TAG_STR });
            }
        } else {
            file.truncate(capacity)?;
            let region = MappedRegion::map_len(&file, capacity)?;
            init(&region);
            trace::debug!(name, capacity, "initialized SPMC queue");
        }
        Ok(Self::from_file(file))
    }

    fn from_file(file: File) -> Self {
        Self {
            file,
            producer_held: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates the write end of the queue.
    ///
    /// Fails with [`QueueError::RoleBusy`] while another producer is alive.
    pub fn create_producer(&self) -> Result<Producer> {
        let guard = RoleGuard::acquire(&self.file, &self.producer_held, "producer")?;
        Producer::new(MappedRegion::map(&self.file)?, guard)
    }

    /// Creates a broadcast read end positioned at the live edge.
    pub fn create_consumer(&self) -> Result<Consumer> {
        Consumer::new(MappedRegion::map(&self.file)?)
    }
}

/// Write end of the SPMC queue.
///
/// Never blocks and never reports backpressure for messages that fit the
/// payload area: old data is overwritten instead.
#[derive(Debug)]
pub struct Producer {
    region: MappedRegion,
    /// Local view of the shared producer position.
    producer_pos_cache: usize,
    /// Offset of the header written by the most recent prepare.
    last_header_offset: Option<usize>,
    _guard: RoleGuard,
}

// SAFETY: The handle owns its mapping and cursor; it is not Sync, which
// enforces the single-writer role per handle.
unsafe impl Send for Producer {}

impl Producer {
    fn new(region: MappedRegion, guard: RoleGuard) -> Result<Self> {
        if !check(&region) {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }
        // SAFETY: check() verified the mapping holds a full MemoryHeader.
        let header = unsafe { &*region.as_ptr().cast::<MemoryHeader>() };
        let producer_pos = header.producer_pos.0.load(Ordering::Acquire);
        // A corrupt counter would put the write cursor outside the mapping.
        if producer_pos > region.len() - DATA_START - HEADER_SIZE {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }
        Ok(Self {
            region,
            producer_pos_cache: producer_pos,
            last_header_offset: None,
            _guard: guard,
        })
    }

    #[inline]
    fn header(&self) -> &MemoryHeader {
        // SAFETY: the mapping outlives the handle and starts with a valid
        // MemoryHeader (verified in new()).
        unsafe { &*self.region.as_ptr().cast::<MemoryHeader>() }
    }

    #[inline]
    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: DATA_START < region.len() per MIN_BUFFER_SIZE.
        unsafe { self.region.as_ptr().add(DATA_START) }
    }

    #[inline]
    fn data_len(&self) -> usize {
        self.region.len() - DATA_START
    }

    /// Total mapped size of the queue in bytes.
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Reserves a contiguous writable span of `size` bytes.
    ///
    /// Returns `None` only when the message cannot fit the payload area at
    /// all; otherwise the reservation always succeeds, possibly
    /// overwriting data that slow consumers have not read yet.
    #[inline]
    pub fn prepare(&mut self, size: usize) -> Option<&mut [u8]> {
        // Bounds the footprint arithmetic below.
        if size > self.data_len() {
            return None;
        }
        let aligned = align_buffer_size(size + HEADER_SIZE);
        if aligned + HEADER_SIZE > self.data_len() {
            return None;
        }

        // SAFETY: the cursor invariant pos + HEADER_SIZE <= data_len holds
        // after every prepare (checked below before advancing), and the
        // oversize check above bounds both placement branches.
        unsafe {
            let header = self
                .data_ptr()
                .add(self.producer_pos_cache)
                .cast::<MessageHeader>();

            if self.producer_pos_cache + aligned + HEADER_SIZE > self.data_len() {
                // Wrap: record the skip in this header and restart the
                // payload at offset 0, clobbering whatever was there.
                let wrapped = align_buffer_size(size);
                header.write(MessageHeader {
                    size: wrapped,
                    payload_offset: 0,
                    payload_size: size,
                });
                self.last_header_offset = Some(self.producer_pos_cache);
                self.producer_pos_cache = wrapped;
                Some(std::slice::from_raw_parts_mut(self.data_ptr(), size))
            } else {
                let payload_offset = self.producer_pos_cache + HEADER_SIZE;
                header.write(MessageHeader {
                    size: aligned - HEADER_SIZE,
                    payload_offset,
                    payload_size: size,
                });
                self.last_header_offset = Some(self.producer_pos_cache);
                self.producer_pos_cache += aligned;
                Some(std::slice::from_raw_parts_mut(
                    self.data_ptr().add(payload_offset),
                    size,
                ))
            }
        }
    }

    /// Publishes the prepared span to all consumers.
    #[inline]
    pub fn commit(&mut self) {
        self.header()
            .producer_pos
            .0
            .store(self.producer_pos_cache, Ordering::Release);
    }

    /// Publishes a narrower span than prepared.
    ///
    /// # Panics
    ///
    /// Panics if no message was prepared or `size` exceeds the prepared
    /// payload size.
    #[inline]
    pub fn commit_sized(&mut self, size: usize) {
        let offset = self
            .last_header_offset
            .expect("commit_sized() without a prepared message");
        // SAFETY: offset was the write cursor of the previous prepare();
        // only this producer writes message headers.
        unsafe {
            let header = &mut *self.data_ptr().add(offset).cast::<MessageHeader>();
            assert!(
                size <= header.payload_size,
                "commit size {size} exceeds prepared size {}",
                header.payload_size
            );
            header.payload_size = size;
        }
        self.commit();
    }
}

impl crate::queue::Producer for Producer {
    #[inline]
    fn prepare(&mut self, size: usize) -> Option<&mut [u8]> {
        self.prepare(size)
    }

    #[inline]
    fn commit(&mut self) {
        self.commit();
    }

    #[inline]
    fn commit_sized(&mut self, size: usize) {
        self.commit_sized(size);
    }
}

/// Broadcast read end of the SPMC queue.
///
/// Each consumer observes a contiguous suffix of the commit order starting
/// at the producer position current when it attached. [`fetch`](Self::fetch)
/// advances the cursor immediately; [`consume`](Self::consume) is a no-op
/// kept for interface symmetry (there is no reclamation to coordinate, and
/// a preempted broadcast consumer gains nothing from deferring the
/// advance).
#[derive(Debug)]
pub struct Consumer {
    region: MappedRegion,
    /// Local read cursor (byte offset into the payload area).
    consumer_pos_cache: usize,
    /// Most recently observed producer position; re-fetched on emptiness.
    producer_pos_cache: usize,
}

// SAFETY: The handle owns its mapping and cursors; it is not Sync.
unsafe impl Send for Consumer {}

impl Consumer {
    fn new(region: MappedRegion) -> Result<Self> {
        if !check(&region) {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }
        // SAFETY: check() verified the mapping holds a full MemoryHeader.
        let header = unsafe { &*region.as_ptr().cast::<MemoryHeader>() };
        // Start at the live edge: only messages committed after this point
        // are observed.
        let producer_pos = header.producer_pos.0.load(Ordering::Relaxed);
        if producer_pos > region.len() - DATA_START - HEADER_SIZE {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }
        Ok(Self {
            region,
            consumer_pos_cache: producer_pos,
            producer_pos_cache: producer_pos,
        })
    }

    #[inline]
    fn header(&self) -> &MemoryHeader {
        // SAFETY: the mapping outlives the handle and starts with a valid
        // MemoryHeader (verified in new()).
        unsafe { &*self.region.as_ptr().cast::<MemoryHeader>() }
    }

    #[inline]
    fn data_ptr(&self) -> *const u8 {
        // SAFETY: DATA_START < region.len() per MIN_BUFFER_SIZE.
        unsafe { self.region.as_ptr().add(DATA_START) }
    }

    #[inline]
    fn data_len(&self) -> usize {
        self.region.len() - DATA_START
    }

    /// Total mapped size of the queue in bytes.
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Returns the next readable message payload and advances past it, or
    /// `None` when no newer message exists.
    ///
    /// The returned bytes may be overwritten by the producer while being
    /// read if this consumer has been lapped; see the module documentation.
    #[inline]
    pub fn fetch(&mut self) -> Option<&[u8]> {
        if self.consumer_pos_cache == self.producer_pos_cache {
            self.producer_pos_cache = self.header().producer_pos.0.load(Ordering::Acquire);
            if self.producer_pos_cache == self.consumer_pos_cache {
                return None;
            }
        }

        // SAFETY: the cursor either trails the producer within valid data
        // or has been lapped; in the lapped case the bytes here are still
        // inside the mapping (cursor invariant pos + HEADER_SIZE <=
        // data_len), merely stale. The bounds check below rejects torn
        // headers before a slice is formed.
        let header = unsafe {
            *self
                .data_ptr()
                .add(self.consumer_pos_cache)
                .cast::<MessageHeader>()
        };

        let payload_end = header.payload_offset.saturating_add(header.payload_size);
        let next_pos = header.payload_offset.saturating_add(header.size);
        if payload_end > self.data_len() || next_pos > self.data_len() - HEADER_SIZE {
            // Torn header from an overrun: resynchronize to the live edge.
            self.reset();
            return None;
        }

        self.consumer_pos_cache = next_pos;

        // SAFETY: payload bounds were validated against the payload area.
        Some(unsafe {
            std::slice::from_raw_parts(
                self.data_ptr().add(header.payload_offset),
                header.payload_size,
            )
        })
    }

    /// No-op: the cursor already advanced in [`fetch`](Self::fetch).
    #[inline]
    pub fn consume(&mut self) {}

    /// Moves the cursor to the live edge, dropping all visible messages.
    pub fn reset(&mut self) {
        self.producer_pos_cache = self.header().producer_pos.0.load(Ordering::Relaxed);
        self.consumer_pos_cache = self.producer_pos_cache;
    }
}

impl crate::queue::Consumer for Consumer {
    #[inline]
    fn fetch(&mut self) -> Option<&[u8]> {
        self.fetch()
    }

    #[inline]
    fn consume(&mut self) {}

    fn reset(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{dequeue, enqueue};
    use crate::source::AnonymousMemorySource;
    use std::mem::{offset_of, size_of};

    fn make_queue(capacity_hint: usize) -> BoundedSpmcQueue {
        BoundedSpmcQueue::open_or_create(
            "spmc-test",
            CreationOptions { capacity_hint },
            &AnonymousMemorySource,
        )
        .unwrap()
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(offset_of!(MemoryHeader, tag), 0);
        assert_eq!(offset_of!(MemoryHeader, producer_pos), CACHE_LINE_SIZE);
        assert_eq!(size_of::<MemoryHeader>(), 2 * CACHE_LINE_SIZE);
        assert_eq!(DATA_START, 2 * CACHE_LINE_SIZE);
    }

    #[test]
    fn test_broadcast_to_two_consumers() {
        let queue = make_queue(size_of::<u64>() * 100);
        let mut producer = queue.create_producer().unwrap();
        let mut first = queue.create_consumer().unwrap();
        let mut second = queue.create_consumer().unwrap();

        for i in 0..10u64 {
            assert!(enqueue(&mut producer, i));
        }

        for consumer in [&mut first, &mut second] {
            for i in 0..10u64 {
                let mut value = u64::MAX;
                assert!(dequeue(consumer, &mut value));
                assert_eq!(value, i);
            }
            let mut value = 0u64;
            assert!(!dequeue(consumer, &mut value));
        }
    }

    #[test]
    fn test_late_consumer_starts_at_live_edge() {
        let queue = make_queue(size_of::<u64>() * 100);
        let mut producer = queue.create_producer().unwrap();

        for i in 0..10u64 {
            assert!(enqueue(&mut producer, i));
        }

        let mut late = queue.create_consumer().unwrap();
        let mut value = 0u64;
        assert!(!dequeue(&mut late, &mut value));

        assert!(enqueue(&mut producer, 10u64));
        assert!(dequeue(&mut late, &mut value));
        assert_eq!(value, 10);
    }

    #[test]
    fn test_producer_is_singleton() {
        let queue = make_queue(4096);
        let producer = queue.create_producer().unwrap();
        assert!(matches!(
            queue.create_producer(),
            Err(QueueError::RoleBusy { role: "producer" })
        ));

        drop(producer);
        assert!(queue.create_producer().is_ok());
    }

    #[test]
    fn test_producer_never_blocks_on_slow_consumer() {
        let queue = make_queue(1024);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        // Far more messages than the ring holds: the producer overwrites
        // instead of reporting backpressure.
        for i in 0..1000u64 {
            assert!(enqueue(&mut producer, i));
        }

        // The lapped consumer stays memory-safe and eventually observes
        // the live edge again.
        let mut value = 0u64;
        while dequeue(&mut consumer, &mut value) {}
        assert!(enqueue(&mut producer, 1000u64));
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let queue = make_queue(4096);
        let mut producer = queue.create_producer().unwrap();
        assert!(producer.prepare(1 << 20).is_none());
    }

    #[test]
    fn test_commit_sized_narrows_payload() {
        let queue = make_queue(4096);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        let buffer = producer.prepare(64).unwrap();
        buffer[..5].copy_from_slice(b"hello");
        producer.commit_sized(5);

        assert_eq!(consumer.fetch().unwrap(), b"hello");
    }
}
