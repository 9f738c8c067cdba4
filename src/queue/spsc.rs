//! Bounded SPSC (single producer, single consumer) byte-message queue over
//! a shared file mapping.
//!
//! Messages are variable-length byte spans packed into a wrapping ring.
//! Each message is preceded by a header recording its aligned footprint
//! and the absolute payload offset, so the consumer never has to recompute
//! placement: on wrap the producer simply points the header's payload at
//! offset 0.
//!
//! # Queue layout
//!
//! ```text
//! s               e   s                      e  s                    e
//! +---------------+---+--------+-------------+--+--------+-----------+-----+--------
//! | MemoryHeader  |xxx| Header | Payload     |xx| Header |  Payload  |xxxxx|uuuuuuuu ...
//! +---------------+---+--------+-------------+--+--------+-----------+-----+--------
//! s   - start
//! e   - end
//! xxx - padding bytes
//! uuu - unused bytes
//! ```
//!
//! # Protocol
//!
//! `producerPos` and `consumerPos` are monotonically non-decreasing byte
//! offsets into the payload area, each on its own cache line. The producer
//! release-stores `producerPos` after all payload writes; the consumer
//! acquire-loads it before any payload read (and vice versa for
//! `consumerPos` and reclamation). Both sides keep local caches so the
//! fast path touches no shared line it does not own.
//!
//! # Example
//!
//! ```no_run
//! use turboq::{enqueue, dequeue, AnonymousMemorySource, BoundedSpscQueue};
//! use turboq::spsc::CreationOptions;
//!
//! let queue = BoundedSpscQueue::open_or_create(
//!     "my-queue",
//!     CreationOptions { capacity_hint: 64 * 1024 },
//!     &AnonymousMemorySource,
//! )?;
//! let mut producer = queue.create_producer()?;
//! let mut consumer = queue.create_consumer()?;
//!
//! assert!(enqueue(&mut producer, 42u64));
//! let mut value = 0u64;
//! assert!(dequeue(&mut consumer, &mut value));
//! assert_eq!(value, 42);
//! # Ok::<(), turboq::QueueError>(())
//! ```

use std::ptr::NonNull;
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
const TAG: [u8; 11] = *b"turboq/SPSC";
const TAG_STR: &str = "turboq/SPSC";

/// Control struct at the start of the queue file.
#[repr(C)]
struct MemoryHeader {
    /// Placeholder for queue tag.
    tag: [u8; TAG.len()],
    /// Producer position (byte offset into the payload area).
    producer_pos: CacheAligned<AtomicUsize>,
    /// Consumer position (byte offset into the payload area).
    consumer_pos: CacheAligned<AtomicUsize>,
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

/// Returns `true` if the region holds a valid SPSC queue.
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
            consumer_pos: CacheAligned(AtomicUsize::new(0)),
        });
    }
}

/// Creation options for [`BoundedSpscQueue`].
#[derive(Debug, Clone, Copy)]
pub struct CreationOptions {
    /// Requested file size in bytes; rounded up to the source's page size.
    pub capacity_hint: usize,
}

/// Bounded SPSC byte-message queue container.
///
/// The container owns the backing file and issues producer and consumer
/// handles, each with its own mapping. The consumer is the singleton role:
/// the first [`create_consumer`](Self::create_consumer) takes the advisory
/// exclusive lock on the backing file, and a second call fails until the
/// handle is dropped.
#[derive(Debug)]
pub struct BoundedSpscQueue {
    file: File,
    consumer_held: Arc<AtomicBool>,
}

impl BoundedSpscQueue {
    /// Attaches to an existing queue. Fails when the file is missing or is
    /// not an SPSC queue.
    pub fn open(name: &str, source: &dyn MemorySource) -> Result<Self> {
        let (file, _page_size) = source.open(name, OpenFlags::OpenOnly)?;
        let region = MappedRegion::map(&file)?;
        if !check(&region) {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }
        trace::debug!(name, "attached SPSC queue");
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
            trace::debug!(name, capacity, "initialized SPSC queue");
        }
        Ok(Self::from_file(file))
    }

    fn from_file(file: File) -> Self {
        Self {
            file,
            consumer_held: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates the write end of the queue.
    ///
    /// The queue object does not restrict producer construction, but only
    /// one live producer is valid per queue.
    pub fn create_producer(&self) -> Result<Producer> {
        Producer::new(MappedRegion::map(&self.file)?)
    }

    /// Creates the read end of the queue.
    ///
    /// Fails with [`QueueError::RoleBusy`] while another consumer is alive.
    pub fn create_consumer(&self) -> Result<Consumer> {
        let guard = RoleGuard::acquire(&self.file, &self.consumer_held, "consumer")?;
        Consumer::new(MappedRegion::map(&self.file)?, guard)
    }
}

/// Write end of the SPSC queue.
///
/// `Producer` is `Send` but not `Sync`; all operations take `&mut self`,
/// so a single handle cannot be driven from two threads at once. Across
/// processes, the caller must ensure only one producer exists.
#[derive(Debug)]
pub struct Producer {
    region: MappedRegion,
    /// Local view of the shared producer position.
    producer_pos_cache: usize,
    /// Bytes known writable at `producer_pos_cache` without re-reading
    /// `consumerPos`.
    min_free_space: usize,
    /// Header of the most recently prepared message.
    last_header: Option<NonNull<MessageHeader>>,
}

// SAFETY: The handle owns its mapping and its position caches; nothing in
// it is tied to the creating thread. It is not Sync (NonNull), which is
// what enforces the single-writer role per handle.
unsafe impl Send for Producer {}

impl Producer {
    fn new(region: MappedRegion) -> Result<Self> {
        if !check(&region) {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }
        // SAFETY: check() verified the mapping holds a full MemoryHeader.
        let header = unsafe { &*region.as_ptr().cast::<MemoryHeader>() };
        let producer_pos = header.producer_pos.0.load(Ordering::Acquire);
        let consumer_pos = header.consumer_pos.0.load(Ordering::Acquire);
        let data_len = region.len() - DATA_START;

        // A corrupt counter would put the write cursor outside the mapping.
        if producer_pos > data_len - HEADER_SIZE || consumer_pos > data_len {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }

        let min_free_space = if consumer_pos > producer_pos {
            // Queue is empty when consumerPos == producerPos, so keep one
            // byte of slack.
            consumer_pos - producer_pos - 1
        } else {
            // Reserve space at the end for one more message header.
            data_len - producer_pos - HEADER_SIZE
        };

        Ok(Self {
            region,
            producer_pos_cache: producer_pos,
            min_free_space,
            last_header: None,
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

    /// Reserves a contiguous writable span of `size` bytes without making
    /// it visible to the consumer. Returns `None` when the queue cannot
    /// currently fit the message.
    #[inline]
    pub fn prepare(&mut self, size: usize) -> Option<&mut [u8]> {
        // Bounds the footprint arithmetic below.
        if size > self.data_len() {
            return None;
        }
        let aligned = align_buffer_size(size + HEADER_SIZE);

        if aligned <= self.min_free_space {
            return Some(self.place(size, aligned));
        }

        let consumer_pos = self.header().consumer_pos.0.load(Ordering::Acquire);

        if consumer_pos > self.producer_pos_cache {
            // The readable region ends ahead of the write cursor.
            self.min_free_space = consumer_pos - self.producer_pos_cache - 1;
            if aligned <= self.min_free_space {
                return Some(self.place(size, aligned));
            }
        } else {
            debug_assert!(self.producer_pos_cache + HEADER_SIZE <= self.data_len());

            // Free region extends to the end of the payload area, minus
            // room for one more message header.
            self.min_free_space = self.data_len() - self.producer_pos_cache - HEADER_SIZE;
            if aligned <= self.min_free_space {
                return Some(self.place(size, aligned));
            }

            // Wrap: skip the tail and put the payload at offset 0. The
            // strict inequality keeps full and empty distinct. The skipped
            // tail is deliberately not zeroed; the consumer jumps via
            // payload_offset.
            let wrapped = align_buffer_size(size);
            if wrapped < consumer_pos {
                // SAFETY: producer_pos_cache + HEADER_SIZE <= data_len
                // (asserted above) so the header fits, and the payload at
                // [0, size) lies below consumer_pos, which the consumer
                // has already released.
                unsafe {
                    let header = self
                        .data_ptr()
                        .add(self.producer_pos_cache)
                        .cast::<MessageHeader>();
                    header.write(MessageHeader {
                        size: wrapped,
                        payload_offset: 0,
                        payload_size: size,
                    });
                    self.last_header = Some(NonNull::new_unchecked(header));
                    self.producer_pos_cache = wrapped;
                    self.min_free_space = consumer_pos - self.producer_pos_cache - 1;
                    return Some(std::slice::from_raw_parts_mut(self.data_ptr(), size));
                }
            }
        }

        None
    }

    /// Places a message at the current write cursor. `aligned` must be
    /// `<= min_free_space`.
    #[inline]
    fn place(&mut self, size: usize, aligned: usize) -> &mut [u8] {
        // SAFETY: aligned <= min_free_space guarantees the whole footprint
        // [pos, pos + aligned) lies inside the payload area and is not
        // readable by the consumer.
        unsafe {
            let header = self
                .data_ptr()
                .add(self.producer_pos_cache)
                .cast::<MessageHeader>();
            let payload_offset = self.producer_pos_cache + HEADER_SIZE;
            header.write(MessageHeader {
                size: aligned - HEADER_SIZE,
                payload_offset,
                payload_size: size,
            });
            self.last_header = Some(NonNull::new_unchecked(header));
            self.producer_pos_cache += aligned;
            self.min_free_space -= aligned;
            std::slice::from_raw_parts_mut(self.data_ptr().add(payload_offset), size)
        }
    }

    /// Publishes the prepared span to the consumer.
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
        let header = self
            .last_header
            .expect("commit_sized() without a prepared message");
        // SAFETY: last_header points at the header written by the previous
        // prepare(); only this producer writes message headers.
        unsafe {
            let header = &mut *header.as_ptr();
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

/// Read end of the SPSC queue.
///
/// Holds the queue's singleton-role lock for its own lifetime; dropping
/// the handle releases it.
#[derive(Debug)]
pub struct Consumer {
    region: MappedRegion,
    /// Local view of the shared consumer position.
    consumer_pos_cache: usize,
    /// Most recently observed producer position; re-fetched on emptiness.
    producer_pos_cache: usize,
    /// Header of the message returned by the last fetch.
    last_header: Option<NonNull<MessageHeader>>,
    _guard: RoleGuard,
}

// SAFETY: Same reasoning as Producer; the role lock travels with the
// handle.
unsafe impl Send for Consumer {}

impl Consumer {
    fn new(region: MappedRegion, guard: RoleGuard) -> Result<Self> {
        if !check(&region) {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }
        // SAFETY: check() verified the mapping holds a full MemoryHeader.
        let header = unsafe { &*region.as_ptr().cast::<MemoryHeader>() };
        let consumer_pos = header.consumer_pos.0.load(Ordering::Acquire);
        let producer_pos = header.producer_pos.0.load(Ordering::Acquire);
        let data_len = region.len() - DATA_START;
        if producer_pos > data_len - HEADER_SIZE || consumer_pos > data_len - HEADER_SIZE {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }
        Ok(Self {
            region,
            consumer_pos_cache: consumer_pos,
            producer_pos_cache: producer_pos,
            last_header: None,
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
    fn data_ptr(&self) -> *const u8 {
        // SAFETY: DATA_START < region.len() per MIN_BUFFER_SIZE.
        unsafe { self.region.as_ptr().add(DATA_START) }
    }

    /// Total mapped size of the queue in bytes.
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Returns the next readable message payload, or `None` when the queue
    /// is empty. Calling `fetch` again before [`consume`](Self::consume)
    /// returns the same message.
    #[inline]
    pub fn fetch(&mut self) -> Option<&[u8]> {
        if self.consumer_pos_cache == self.producer_pos_cache {
            self.producer_pos_cache = self.header().producer_pos.0.load(Ordering::Acquire);
            if self.producer_pos_cache == self.consumer_pos_cache {
                return None;
            }
        }

        // SAFETY: producerPos is ahead of the read cursor, so a committed
        // header exists here; the release/acquire pair on producerPos made
        // the header and payload writes visible.
        unsafe {
            let header = self
                .data_ptr()
                .add(self.consumer_pos_cache)
                .cast::<MessageHeader>();
            self.last_header = Some(NonNull::new_unchecked(header.cast_mut()));
            let header = &*header;
            Some(std::slice::from_raw_parts(
                self.data_ptr().add(header.payload_offset),
                header.payload_size,
            ))
        }
    }

    /// Releases the last fetched message back to the producer.
    ///
    /// # Panics
    ///
    /// Panics if no message has been fetched.
    #[inline]
    pub fn consume(&mut self) {
        let header = self
            .last_header
            .expect("consume() without a fetched message");
        // SAFETY: points at the header returned by the last fetch.
        let header = unsafe { header.as_ref() };
        // A wrap header's payload_offset + size equals the wrap target's
        // tail, so this single assignment covers both the normal and the
        // wrap case.
        self.consumer_pos_cache = header.payload_offset + header.size;
        self.header()
            .consumer_pos
            .0
            .store(self.consumer_pos_cache, Ordering::Release);
    }

    /// Drops all currently visible messages by republishing the producer's
    /// position as the consumer's.
    ///
    /// Only safe to call while no fetched message is outstanding.
    pub fn reset(&mut self) {
        self.producer_pos_cache = self.header().producer_pos.0.load(Ordering::Acquire);
        self.consumer_pos_cache = self.producer_pos_cache;
        self.header()
            .consumer_pos
            .0
            .store(self.consumer_pos_cache, Ordering::Release);
    }
}

impl crate::queue::Consumer for Consumer {
    #[inline]
    fn fetch(&mut self) -> Option<&[u8]> {
        self.fetch()
    }

    #[inline]
    fn consume(&mut self) {
        self.consume();
    }

    fn reset(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{dequeue, enqueue, fetch};
    use crate::source::AnonymousMemorySource;
    use std::mem::{offset_of, size_of};

    fn make_queue(capacity_hint: usize) -> BoundedSpscQueue {
        BoundedSpscQueue::open_or_create(
            "spsc-test",
            CreationOptions { capacity_hint },
            &AnonymousMemorySource,
        )
        .unwrap()
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(offset_of!(MemoryHeader, tag), 0);
        assert_eq!(offset_of!(MemoryHeader, producer_pos), CACHE_LINE_SIZE);
        assert_eq!(offset_of!(MemoryHeader, consumer_pos), 2 * CACHE_LINE_SIZE);
        assert_eq!(size_of::<MemoryHeader>(), 3 * CACHE_LINE_SIZE);
        assert_eq!(DATA_START, 3 * CACHE_LINE_SIZE);
        assert_eq!(HEADER_SIZE, 3 * size_of::<usize>());
    }

    #[test]
    fn test_basic_roundtrip_with_peek() {
        let queue = make_queue(size_of::<u64>() * 100);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        for i in 0..10u64 {
            assert!(enqueue(&mut producer, i));
        }

        for i in 0..10u64 {
            let mut value = u64::MAX;
            assert!(fetch(&mut consumer, &mut value));
            assert_eq!(value, i);

            // Peeking again yields the same message.
            value = u64::MAX;
            assert!(fetch(&mut consumer, &mut value));
            assert_eq!(value, i);

            value = u64::MAX;
            assert!(dequeue(&mut consumer, &mut value));
            assert_eq!(value, i);
        }

        let mut value = u64::MAX;
        assert!(!fetch(&mut consumer, &mut value));
        assert_eq!(value, u64::MAX);
        assert!(!dequeue(&mut consumer, &mut value));
    }

    #[test]
    fn test_full_queue_recovers_after_drain() {
        let queue = make_queue(1024);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        let mut accepted = 0u64;
        while enqueue(&mut producer, accepted) {
            accepted += 1;
        }
        assert!(accepted > 0);

        let mut drained = 0u64;
        let mut value = 0u64;
        while dequeue(&mut consumer, &mut value) {
            assert_eq!(value, drained);
            drained += 1;
        }
        assert_eq!(drained, accepted);

        // Space is reclaimed: the producer can make progress again.
        assert!(enqueue(&mut producer, u64::MAX));
    }

    #[test]
    fn test_wrap_preserves_payload_bytes() {
        let queue = make_queue(2 * 1024);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        let payload = [0xA5u8; 512];
        let mut sent = 0usize;
        let mut received = 0usize;

        while received < 1_000 {
            if sent < 1_000 {
                if let Some(buffer) = producer.prepare(payload.len()) {
                    buffer.copy_from_slice(&payload);
                    producer.commit();
                    sent += 1;
                }
            }
            if let Some(buffer) = consumer.fetch() {
                assert_eq!(buffer, &payload[..]);
                consumer.consume();
                received += 1;
            }
        }
        assert_eq!(sent, 1_000);
    }

    #[test]
    fn test_commit_sized_narrows_payload() {
        let queue = make_queue(4096);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        let buffer = producer.prepare(64).unwrap();
        buffer[..3].copy_from_slice(b"abc");
        producer.commit_sized(3);

        assert_eq!(consumer.fetch().unwrap(), b"abc");
        consumer.consume();
    }

    #[test]
    #[should_panic(expected = "exceeds prepared size")]
    fn test_commit_sized_overrun_panics() {
        let queue = make_queue(4096);
        let mut producer = queue.create_producer().unwrap();
        producer.prepare(8).unwrap();
        producer.commit_sized(9);
    }

    #[test]
    fn test_consumer_is_singleton() {
        let queue = make_queue(4096);
        let consumer = queue.create_consumer().unwrap();
        assert!(matches!(
            queue.create_consumer(),
            Err(QueueError::RoleBusy { role: "consumer" })
        ));

        drop(consumer);
        assert!(queue.create_consumer().is_ok());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let queue = make_queue(4096);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        // Reset on an empty queue is a no-op.
        consumer.reset();
        assert!(consumer.fetch().is_none());

        for i in 0..5u64 {
            assert!(enqueue(&mut producer, i));
        }
        consumer.reset();
        consumer.reset();
        assert!(consumer.fetch().is_none());

        // The producer continues from the reset position.
        assert!(enqueue(&mut producer, 99u64));
        let mut value = 0u64;
        assert!(dequeue(&mut consumer, &mut value));
        assert_eq!(value, 99);
    }

    #[test]
    fn test_capacity_hint_validation() {
        assert!(matches!(
            BoundedSpscQueue::open_or_create(
                "spsc-tiny",
                CreationOptions { capacity_hint: 16 },
                &AnonymousMemorySource,
            ),
            Err(QueueError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_oversized_message_is_rejected_in_band() {
        let queue = make_queue(4096);
        let mut producer = queue.create_producer().unwrap();
        // Larger than the whole payload area: backpressure, not a panic.
        assert!(producer.prepare(1 << 20).is_none());
    }
}
