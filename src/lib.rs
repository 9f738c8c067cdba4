//! Shared-memory lock-free byte-message queues for single-host IPC.
//!
//! This crate provides three bounded queues over a shared file mapping, so
//! that independent processes can attach to the same queue by name and
//! exchange raw byte payloads with no syscalls on the fast path:
//!
//! - [`BoundedSpscQueue`]: single producer, single consumer; byte-packed
//!   ring of variable-length messages with producer-side backpressure.
//! - [`BoundedSpmcQueue`]: single producer, any number of independent
//!   broadcast consumers; the producer never waits and slow consumers can
//!   be overrun.
//! - [`BoundedMpscQueue`]: any number of producers, single consumer;
//!   fixed-size slots reserved by compare-exchange and published through
//!   per-slot commit flags.
//!
//! Queues are backed by a file from a [`MemorySource`]: a directory on a
//! tmpfs or hugetlbfs mount ([`DefaultMemorySource`]) or an anonymous
//! memfd ([`AnonymousMemorySource`]). The first opener that supplies
//! creation options initializes the file; later openers attach by name and
//! are validated against the embedded queue tag and the recomputed size.
//!
//! All operations are non-blocking. A producer that cannot make progress
//! gets `None` from `prepare`; a consumer with nothing to read gets `None`
//! from `fetch`; the caller decides whether to spin, yield, sleep, or
//! drop. There is no condition variable, futex, or eventfd anywhere in the
//! hot path; the only kernel interactions are mapping, advisory locking,
//! and truncation, all at construction time.
//!
//! Attachment validates the queue tag, the recomputed size, and the shared
//! position counters, but after that the parties trust each other: the
//! protocol assumes every process attached to a queue is a cooperating
//! user of this library, as is usual for shared-memory transports.
//!
//! # Example
//!
//! ```no_run
//! use turboq::spsc::CreationOptions;
//! use turboq::{dequeue, enqueue, BoundedSpscQueue, DefaultMemorySource};
//!
//! let source = DefaultMemorySource::new()?;
//! let queue = BoundedSpscQueue::open_or_create(
//!     "ticker",
//!     CreationOptions { capacity_hint: 1 << 20 },
//!     &source,
//! )?;
//!
//! // Typically in different processes:
//! let mut producer = queue.create_producer()?;
//! let mut consumer = queue.create_consumer()?;
//!
//! assert!(enqueue(&mut producer, 42u64));
//! let mut value = 0u64;
//! assert!(dequeue(&mut consumer, &mut value));
//! assert_eq!(value, 42);
//! # Ok::<(), turboq::QueueError>(())
//! ```
//!
//! # Raw spans
//!
//! The typed [`enqueue`]/[`dequeue`]/[`fetch`] helpers are a thin layer
//! over the raw producer operations `prepare`/`commit` and consumer
//! operations `fetch`/`consume`: `prepare` hands out a writable span
//! inside the mapping, `commit` publishes it atomically, `fetch` hands out
//! the next committed span, and `consume` releases it for reuse. Payloads
//! are opaque byte ranges; nothing in the queue interprets them.

mod detail;
mod error;
mod queue;

pub mod file;
pub mod region;
pub mod source;
pub mod trace;

pub use error::{QueueError, Result};
pub use queue::mpsc::BoundedMpscQueue;
pub use queue::spmc::BoundedSpmcQueue;
pub use queue::spsc::BoundedSpscQueue;
pub use queue::{dequeue, enqueue, fetch, Consumer, Producer};
pub use source::{AnonymousMemorySource, DefaultMemorySource, HugePagesOption, MemorySource, OpenFlags};

pub use queue::{mpsc, spmc, spsc};
