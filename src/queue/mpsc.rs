//! Bounded MPSC (multiple producers, single consumer) queue over a shared
//! file mapping.
//!
//! Unlike the byte-packed SPSC/SPMC rings, the MPSC queue is a fixed-slot
//! ring: `length` slots (a power of two) of `maxMessageSize` bytes each,
//! plus a parallel array of per-slot commit flags, one cache line per
//! flag. Producers race a compare-exchange on `producerPos` to reserve a
//! slot, write the message, then publish it by release-storing the slot's
//! commit flag. The reservation decouples slot ownership from publication,
//! so producers never serialize behind each other's payload writes.
//!
//! # Queue layout
//!
//! ```text
//! +---------------+------------+------------+-----+------------+-------+-------+-----+
//! | MemoryHeader  |   Slot 0   |   Slot 1   | ... | Slot N-1   | Flag0 | Flag1 | ... |
//! +---------------+------------+------------+-----+------------+-------+-------+-----+
//! each slot: MessageHeader { payloadSize } + payload, maxMessageSize bytes
//! each flag: one cache line
//! ```
//!
//! # Ordering
//!
//! `producerPos` and `consumerPos` are message indices that grow without
//! bound; the slot index is `pos & (length - 1)`. Producers reserve slots
//! in CAS-win order but publish in arbitrary real-time order; the consumer
//! refuses to advance past an unpublished slot, so the observed order is
//! the reservation order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::detail::{align_up, upper_pow_2, CacheAligned, CACHE_LINE_SIZE};
use crate::error::{QueueError, Result};
use crate::file::File;
use crate::queue::RoleGuard;
use crate::region::MappedRegion;
use crate::source::{MemorySource, OpenFlags};
use crate::trace;

/// Queue-kind tag, present verbatim at offset 0 of the backing file.
const TAG: [u8; 11] = *b"turboq/MPSC";
const TAG_STR: &str = "turboq/MPSC";

/// Control struct at the start of the queue file.
#[repr(C)]
struct MemoryHeader {
    /// Placeholder for queue tag.
    tag: [u8; TAG.len()],
    /// Slot footprint in bytes (message header included).
    max_message_size: usize,
    /// Number of slots (power of two).
    length: usize,
    /// Consumer position (message index).
    consumer_pos: CacheAligned<AtomicUsize>,
    /// Producer position (message index).
    producer_pos: CacheAligned<AtomicUsize>,
}

/// Control struct at the start of each slot.
#[repr(C)]
#[derive(Clone, Copy)]
struct MessageHeader {
    /// Current payload length in bytes.
    payload_size: usize,
}

/// Per-slot commit flag, alone on its cache line. `true` means the
/// producer has fully written the slot; `false` means empty or reclaimed.
#[repr(C, align(128))]
struct CommitState {
    committed: AtomicBool,
}

const HEADER_SIZE: usize = std::mem::size_of::<MessageHeader>();
const STATE_SIZE: usize = std::mem::size_of::<CommitState>();

/// Offset of the first slot from the start of the file.
const DATA_START: usize = align_up(std::mem::size_of::<MemoryHeader>(), CACHE_LINE_SIZE);

#[inline]
const fn align_buffer_size(value: usize) -> usize {
    align_up(value, CACHE_LINE_SIZE)
}

/// Returns `true` if the region holds a valid MPSC queue whose slot and
/// flag arrays fit the mapping.
fn check(region: &MappedRegion) -> bool {
    if region.len() < DATA_START {
        return false;
    }
    // SAFETY: the length check guarantees a full MemoryHeader is mapped.
    let header = unsafe { &*region.as_ptr().cast::<MemoryHeader>() };
    if header.tag != TAG {
        return false;
    }
    if header.max_message_size == 0 || header.length == 0 {
        return false;
    }
    // Reject corrupt geometry before any slot access.
    let per_slot = header.max_message_size.checked_add(STATE_SIZE);
    let Some(needed) = per_slot
        .and_then(|per_slot| per_slot.checked_mul(header.length))
        .and_then(|arrays| arrays.checked_add(DATA_START))
    else {
        return false;
    };
    needed <= region.len()
}

/// Initializes a freshly truncated queue file. Position counters and
/// commit flags rely on the file reading as zeros.
fn init(region: &MappedRegion, max_message_size: usize, length: usize) {
    // SAFETY: the caller mapped the full recomputed capacity of a file it
    // just created, so no other process can observe the partial write.
    unsafe {
        region.as_ptr().cast::<MemoryHeader>().write(MemoryHeader {
            tag: TAG,
            max_message_size,
            length,
            consumer_pos: CacheAligned(AtomicUsize::new(0)),
            producer_pos: CacheAligned(AtomicUsize::new(0)),
        });
    }
}

/// Creation options for [`BoundedMpscQueue`].
#[derive(Debug, Clone, Copy)]
pub struct CreationOptions {
    /// Largest payload, in bytes, a single message may carry.
    pub max_message_size_hint: usize,
    /// Requested slot count; rounded up to a power of two.
    pub length_hint: usize,
}

/// Bounded MPSC queue container.
///
/// The consumer is the singleton role; any number of producers may attach.
#[derive(Debug)]
pub struct BoundedMpscQueue {
    file: File,
    consumer_held: Arc<AtomicBool>,
}

impl BoundedMpscQueue {
    /// Attaches to an existing queue. Fails when the file is missing or is
    /// not an MPSC queue.
    pub fn open(name: &str, source: &dyn MemorySource) -> Result<Self> {
        let (file, _page_size) = source.open(name, OpenFlags::OpenOnly)?;
        let region = MappedRegion::map(&file)?;
        if !check(&region) {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }
        trace::debug!(name, "attached MPSC queue");
        Ok(Self::from_file(file))
    }

    /// Attaches to a queue, creating and initializing it if missing.
    ///
    /// The slot footprint is `align_up(max_message_size_hint +
    /// sizeof(MessageHeader), 128)` and the slot count is `length_hint`
    /// rounded up to a power of two. When the file already exists its size
    /// must equal the size recomputed from `options`.
    pub fn open_or_create(
        name: &str,
        options: CreationOptions,
        source: &dyn MemorySource,
    ) -> Result<Self> {
        if options.max_message_size_hint == 0 {
            return Err(QueueError::InvalidOptions("max message size hint is zero"));
        }
        if options.length_hint == 0 {
            return Err(QueueError::InvalidOptions("length hint is zero"));
        }
        let (file, page_size) = source.open(name, OpenFlags::OpenOrCreate)?;

        let max_message_size = align_buffer_size(options.max_message_size_hint + HEADER_SIZE);
        let length = upper_pow_2(options.length_hint);
        let capacity_hint = DATA_START + (max_message_size + STATE_SIZE) * length;
        let capacity = align_up(capacity_hint, page_size);

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
            init(&region, max_message_size, length);
            trace::debug!(name, capacity, max_message_size, length, "initialized MPSC queue");
        }
        Ok(Self::from_file(file))
    }

    fn from_file(file: File) -> Self {
        Self {
            file,
            consumer_held: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a write end of the queue. Any number of producers may
    /// coexist, in this process or others.
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

/// Slot geometry shared by both ends.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    max_message_size: usize,
    length: usize,
}

impl Geometry {
    #[inline]
    fn slot_of(&self, pos: usize) -> usize {
        pos & (self.length - 1)
    }
}

/// Write end of the MPSC queue.
#[derive(Debug)]
pub struct Producer {
    region: MappedRegion,
    geometry: Geometry,
    /// Slot index reserved by the most recent prepare, pending commit.
    reserved_slot: Option<usize>,
    /// Local view of the shared consumer position.
    consumer_pos_cache: usize,
}

// SAFETY: The handle owns its mapping and caches; payload writes go only
// to slots this handle reserved by winning the CAS. Not Sync, so a single
// handle cannot race itself.
unsafe impl Send for Producer {}

impl Producer {
    fn new(region: MappedRegion) -> Result<Self> {
        if !check(&region) {
            return Err(QueueError::InvalidQueue { expected: TAG_STR });
        }
        // SAFETY: check() verified the header and geometry.
        let header = unsafe { &*region.as_ptr().cast::<MemoryHeader>() };
        let geometry = Geometry {
            max_message_size: header.max_message_size,
            length: header.length,
        };
        let consumer_pos = header.consumer_pos.0.load(Ordering::Acquire);
        Ok(Self {
            region,
            geometry,
            reserved_slot: None,
            consumer_pos_cache: consumer_pos,
        })
    }

    #[inline]
    fn header(&self) -> &MemoryHeader {
        // SAFETY: the mapping outlives the handle and starts with a valid
        // MemoryHeader (verified in new()).
        unsafe { &*self.region.as_ptr().cast::<MemoryHeader>() }
    }

    #[inline]
    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        debug_assert!(slot < self.geometry.length);
        // SAFETY: check() proved all slots lie inside the mapping.
        unsafe {
            self.region
                .as_ptr()
                .add(DATA_START + slot * self.geometry.max_message_size)
        }
    }

    #[inline]
    fn commit_state(&self, slot: usize) -> &CommitState {
        debug_assert!(slot < self.geometry.length);
        // SAFETY: check() proved the flag array lies inside the mapping;
        // CommitState is 128-byte aligned and so is its offset.
        unsafe {
            &*self
                .region
                .as_ptr()
                .add(DATA_START + self.geometry.length * self.geometry.max_message_size)
                .cast::<CommitState>()
                .add(slot)
        }
    }

    /// Largest payload a single message may carry.
    pub fn max_message_size(&self) -> usize {
        self.geometry.max_message_size - HEADER_SIZE
    }

    /// Number of slots in the ring.
    pub fn length(&self) -> usize {
        self.geometry.length
    }

    /// Reserves a slot and returns its writable payload span, or `None`
    /// when all `length` slots hold unconsumed messages.
    ///
    /// # Panics
    ///
    /// Panics if `size` exceeds [`max_message_size`](Self::max_message_size);
    /// an oversized message is a programmer error, not a flow-control
    /// condition.
    #[inline]
    pub fn prepare(&mut self, size: usize) -> Option<&mut [u8]> {
        assert!(
            size <= self.geometry.max_message_size - HEADER_SIZE,
            "message size {size} exceeds queue max of {}",
            self.geometry.max_message_size - HEADER_SIZE
        );

        let mut current = self.header().producer_pos.0.load(Ordering::Acquire);
        if current - self.consumer_pos_cache >= self.geometry.length {
            self.consumer_pos_cache = self.header().consumer_pos.0.load(Ordering::Acquire);
            if current - self.consumer_pos_cache >= self.geometry.length {
                return None;
            }
        }

        // Race other producers for the slot at `current`.
        while let Err(observed) = self.header().producer_pos.0.compare_exchange_weak(
            current,
            current + 1,
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            current = observed;
            if current - self.consumer_pos_cache >= self.geometry.length {
                return None;
            }
        }

        let slot = self.geometry.slot_of(current);
        self.reserved_slot = Some(slot);

        // SAFETY: winning the CAS grants exclusive write access to this
        // slot until the consumer reclaims it; the slot's commit flag is
        // still false, so no consumer reads it yet.
        unsafe {
            let content = self.slot_ptr(slot);
            content
                .cast::<MessageHeader>()
                .write(MessageHeader { payload_size: size });
            Some(std::slice::from_raw_parts_mut(content.add(HEADER_SIZE), size))
        }
    }

    /// Publishes the reserved slot to the consumer.
    ///
    /// # Panics
    ///
    /// Panics if no reservation is pending.
    #[inline]
    pub fn commit(&mut self) {
        let slot = self
            .reserved_slot
            .take()
            .expect("commit() without a prepared message");
        self.commit_state(slot).committed.store(true, Ordering::Release);
    }

    /// Publishes a narrower span than prepared.
    ///
    /// # Panics
    ///
    /// Panics if no reservation is pending or `size` exceeds the prepared
    /// payload size.
    #[inline]
    pub fn commit_sized(&mut self, size: usize) {
        let slot = self
            .reserved_slot
            .expect("commit_sized() without a prepared message");
        // SAFETY: the slot is still owned by this producer (flag false).
        unsafe {
            let header = &mut *self.slot_ptr(slot).cast::<MessageHeader>();
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

/// Read end of the MPSC queue.
///
/// Holds the queue's singleton-role lock for its own lifetime; dropping
/// the handle releases it.
#[derive(Debug)]
pub struct Consumer {
    region: MappedRegion,
    geometry: Geometry,
    /// Local view of the shared consumer position (message index).
    consumer_pos_cache: usize,
    /// Most recently observed producer position; re-fetched on emptiness.
    producer_pos_cache: usize,
    /// Slot of the message returned by the last fetch.
    last_slot: Option<usize>,
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
        // SAFETY: check() verified the header and geometry.
        let header = unsafe { &*region.as_ptr().cast::<MemoryHeader>() };
        let geometry = Geometry {
            max_message_size: header.max_message_size,
            length: header.length,
        };
        let producer_pos = header.producer_pos.0.load(Ordering::Acquire);
        let consumer_pos = header.consumer_pos.0.load(Ordering::Acquire);
        Ok(Self {
            region,
            geometry,
            consumer_pos_cache: consumer_pos,
            producer_pos_cache: producer_pos,
            last_slot: None,
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
    fn slot_ptr(&self, slot: usize) -> *const u8 {
        debug_assert!(slot < self.geometry.length);
        // SAFETY: check() proved all slots lie inside the mapping.
        unsafe {
            self.region
                .as_ptr()
                .add(DATA_START + slot * self.geometry.max_message_size)
        }
    }

    #[inline]
    fn commit_state(&self, slot: usize) -> &CommitState {
        debug_assert!(slot < self.geometry.length);
        // SAFETY: check() proved the flag array lies inside the mapping.
        unsafe {
            &*self
                .region
                .as_ptr()
                .add(DATA_START + self.geometry.length * self.geometry.max_message_size)
                .cast::<CommitState>()
                .add(slot)
        }
    }

    /// Largest payload a single message may carry.
    pub fn max_message_size(&self) -> usize {
        self.geometry.max_message_size - HEADER_SIZE
    }

    /// Number of slots in the ring.
    pub fn length(&self) -> usize {
        self.geometry.length
    }

    /// Returns the next readable message payload, or `None` when the queue
    /// is empty or the next slot is reserved but not yet published.
    #[inline]
    pub fn fetch(&mut self) -> Option<&[u8]> {
        if self.consumer_pos_cache == self.producer_pos_cache {
            self.producer_pos_cache = self.header().producer_pos.0.load(Ordering::Acquire);
            if self.producer_pos_cache == self.consumer_pos_cache {
                return None;
            }
        }

        let slot = self.geometry.slot_of(self.consumer_pos_cache);
        // A reservation exists but the producer has not published yet:
        // refuse to advance past it, preserving reservation order.
        if !self.commit_state(slot).committed.load(Ordering::Acquire) {
            return None;
        }

        self.last_slot = Some(slot);

        // SAFETY: the acquire load of the commit flag synchronizes with
        // the producer's release store, making the header and payload
        // writes visible; payload_size was bounded at prepare time.
        unsafe {
            let content = self.slot_ptr(slot);
            let payload_size = (*content.cast::<MessageHeader>()).payload_size;
            debug_assert!(payload_size + HEADER_SIZE <= self.geometry.max_message_size);
            Some(std::slice::from_raw_parts(content.add(HEADER_SIZE), payload_size))
        }
    }

    /// Releases the last fetched message's slot back to the producers.
    ///
    /// # Panics
    ///
    /// Panics if no message has been fetched.
    #[inline]
    pub fn consume(&mut self) {
        let slot = self
            .last_slot
            .take()
            .expect("consume() without a fetched message");
        self.consumer_pos_cache += 1;
        self.commit_state(slot).committed.store(false, Ordering::Release);
        self.header()
            .consumer_pos
            .0
            .store(self.consumer_pos_cache, Ordering::Release);
    }

    /// Drops all messages up to the current producer position, clearing
    /// their commit flags so the slots can be reused.
    pub fn reset(&mut self) {
        self.producer_pos_cache = self.header().producer_pos.0.load(Ordering::Acquire);
        while self.consumer_pos_cache != self.producer_pos_cache {
            let slot = self.geometry.slot_of(self.consumer_pos_cache);
            self.commit_state(slot).committed.store(false, Ordering::Release);
            self.consumer_pos_cache += 1;
        }
        self.last_slot = None;
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
    use crate::queue::{dequeue, enqueue};
    use crate::source::AnonymousMemorySource;
    use std::mem::{offset_of, size_of};

    fn make_queue(max_message_size_hint: usize, length_hint: usize) -> BoundedMpscQueue {
        BoundedMpscQueue::open_or_create(
            "mpsc-test",
            CreationOptions {
                max_message_size_hint,
                length_hint,
            },
            &AnonymousMemorySource,
        )
        .unwrap()
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(offset_of!(MemoryHeader, tag), 0);
        assert_eq!(offset_of!(MemoryHeader, max_message_size), 16);
        assert_eq!(offset_of!(MemoryHeader, length), 24);
        assert_eq!(offset_of!(MemoryHeader, consumer_pos), CACHE_LINE_SIZE);
        assert_eq!(offset_of!(MemoryHeader, producer_pos), 2 * CACHE_LINE_SIZE);
        assert_eq!(size_of::<MemoryHeader>(), 3 * CACHE_LINE_SIZE);
        assert_eq!(size_of::<CommitState>(), CACHE_LINE_SIZE);
    }

    #[test]
    fn test_geometry_from_hints() {
        let queue = make_queue(8, 10);
        let producer = queue.create_producer().unwrap();
        // 8 + 8 rounds up to one cache line; 10 rounds up to 16 slots.
        assert_eq!(producer.max_message_size(), CACHE_LINE_SIZE - HEADER_SIZE);
        assert_eq!(producer.length(), 16);
    }

    #[test]
    fn test_basic_roundtrip() {
        let queue = make_queue(8, 16);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        for i in 0..10u64 {
            assert!(enqueue(&mut producer, i));
        }
        for i in 0..10u64 {
            let mut value = u64::MAX;
            assert!(dequeue(&mut consumer, &mut value));
            assert_eq!(value, i);
        }
        let mut value = 0u64;
        assert!(!dequeue(&mut consumer, &mut value));
    }

    #[test]
    fn test_full_until_consumer_drains() {
        let queue = make_queue(8, 10);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        // length rounds up to 16 outstanding messages.
        for i in 0..16u64 {
            assert!(enqueue(&mut producer, i));
        }
        assert!(!enqueue(&mut producer, 16u64));

        let mut value = 0u64;
        assert!(dequeue(&mut consumer, &mut value));
        assert_eq!(value, 0);
        assert!(enqueue(&mut producer, 16u64));
        assert!(!enqueue(&mut producer, 17u64));
    }

    #[test]
    fn test_wraparound_with_retry() {
        let queue = make_queue(8, 10);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        let mut sent = 0u64;
        let mut received = 0u64;
        while received < 32 {
            if sent < 32 && enqueue(&mut producer, sent) {
                sent += 1;
            }
            let mut value = 0u64;
            if dequeue(&mut consumer, &mut value) {
                assert_eq!(value, received);
                received += 1;
            }
        }
    }

    #[test]
    #[should_panic(expected = "exceeds queue max")]
    fn test_oversized_prepare_panics() {
        let queue = make_queue(8, 16);
        let mut producer = queue.create_producer().unwrap();
        let max = producer.max_message_size();
        let _ = producer.prepare(max + 1);
    }

    #[test]
    fn test_fifo_follows_reservation_order() {
        let queue = make_queue(8, 16);
        let mut slow = queue.create_producer().unwrap();
        let mut fast = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        // `slow` reserves first but does not publish yet.
        let buffer = slow.prepare(8).unwrap();
        buffer.copy_from_slice(&1u64.to_ne_bytes());

        // `fast` reserves the next slot and publishes immediately.
        assert!(enqueue(&mut fast, 2u64));

        // The consumer cannot advance past the unpublished reservation.
        let mut value = 0u64;
        assert!(!dequeue(&mut consumer, &mut value));

        slow.commit();
        assert!(dequeue(&mut consumer, &mut value));
        assert_eq!(value, 1);
        assert!(dequeue(&mut consumer, &mut value));
        assert_eq!(value, 2);
    }

    #[test]
    fn test_two_producers_interleave_consistently() {
        let queue = make_queue(8, 16);
        let mut consumer = queue.create_consumer().unwrap();
        let mut a = queue.create_producer().unwrap();
        let mut b = queue.create_producer().unwrap();

        let writer_a = std::thread::spawn(move || {
            for value in (0..200u64).step_by(2) {
                while !enqueue(&mut a, value) {
                    std::thread::yield_now();
                }
            }
        });
        let writer_b = std::thread::spawn(move || {
            for value in (1..200u64).step_by(2) {
                while !enqueue(&mut b, value) {
                    std::thread::yield_now();
                }
            }
        });

        let mut evens = Vec::new();
        let mut odds = Vec::new();
        while evens.len() + odds.len() < 200 {
            let mut value = 0u64;
            if dequeue(&mut consumer, &mut value) {
                if value % 2 == 0 {
                    evens.push(value);
                } else {
                    odds.push(value);
                }
            } else {
                std::thread::yield_now();
            }
        }
        writer_a.join().unwrap();
        writer_b.join().unwrap();

        // Per-producer order survives the interleaving.
        assert_eq!(evens, (0..200u64).step_by(2).collect::<Vec<_>>());
        assert_eq!(odds, (1..200u64).step_by(2).collect::<Vec<_>>());
    }

    #[test]
    fn test_consumer_is_singleton() {
        let queue = make_queue(8, 16);
        let consumer = queue.create_consumer().unwrap();
        assert!(matches!(
            queue.create_consumer(),
            Err(QueueError::RoleBusy { role: "consumer" })
        ));
        drop(consumer);
        assert!(queue.create_consumer().is_ok());
    }

    #[test]
    fn test_reset_drops_pending_messages() {
        let queue = make_queue(8, 4);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        for i in 0..4u64 {
            assert!(enqueue(&mut producer, i));
        }
        assert!(!enqueue(&mut producer, 4u64));

        consumer.reset();
        consumer.reset(); // idempotent

        let mut value = 0u64;
        assert!(!dequeue(&mut consumer, &mut value));
        assert!(enqueue(&mut producer, 4u64));
        assert!(dequeue(&mut consumer, &mut value));
        assert_eq!(value, 4);
    }

    #[test]
    fn test_zero_hints_are_rejected() {
        let source = AnonymousMemorySource;
        assert!(matches!(
            BoundedMpscQueue::open_or_create(
                "mpsc-bad",
                CreationOptions { max_message_size_hint: 0, length_hint: 4 },
                &source,
            ),
            Err(QueueError::InvalidOptions(_))
        ));
        assert!(matches!(
            BoundedMpscQueue::open_or_create(
                "mpsc-bad",
                CreationOptions { max_message_size_hint: 8, length_hint: 0 },
                &source,
            ),
            Err(QueueError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_commit_sized_narrows_payload() {
        let queue = make_queue(64, 4);
        let mut producer = queue.create_producer().unwrap();
        let mut consumer = queue.create_consumer().unwrap();

        let buffer = producer.prepare(32).unwrap();
        buffer[..4].copy_from_slice(b"ping");
        producer.commit_sized(4);

        assert_eq!(consumer.fetch().unwrap(), b"ping");
        consumer.consume();
    }
}
