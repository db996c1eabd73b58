//! Fixed-capacity ring buffer shared by the refill task and the render callback
//!
//! The buffer is split in two layers:
//! - [`RingBufferRecord`]: head/tail/fill bookkeeping, no storage
//! - [`RingBuffer`]: backing store allocated once, plus the record behind a mutex
//!
//! Producer and consumer never copy through the lock. Each side asks the record
//! for the region it currently owns, copies directly into or out of the backing
//! store, and then advances its cursor with a short locked update of the three
//! integers. A single wrap point means each side issues at most two contiguous
//! copies per operation.
//!
//! ```text
//!        head              tail
//!         v                 v
//!  [ .... XXXXXXXXXXXXXXXXXX ........ ]   X = fill_count (consumer owns)
//!                                         . = space      (producer owns)
//! ```
//!
//! Ownership is enforced with role handles: [`RingBuffer::split`] hands out one
//! [`RingProducer`] and one [`RingConsumer`]; a second split fails until both
//! handles are dropped, and [`RingBuffer::clear`] refuses to run while either
//! role is alive.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Ring buffer contract violations
///
/// These indicate a programming error in the caller, not a runtime condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingBufferError {
    /// `produce` advanced past the space reported before writing
    #[error("produce of {requested} exceeds contiguous space {available}")]
    CapacityExceeded {
        /// Amount passed to produce
        requested: usize,
        /// Contiguous space at the time of the call
        available: usize,
    },

    /// `consume` advanced past the data reported before reading
    #[error("consume of {requested} exceeds contiguous fill {available}")]
    UnderrunViolation {
        /// Amount passed to consume
        requested: usize,
        /// Contiguous fill at the time of the call
        available: usize,
    },

    /// A producer or consumer handle is already outstanding
    #[error("ring buffer roles already taken")]
    RolesInUse,

    /// Clear attempted while a producer or consumer handle is alive
    #[error("ring buffer cleared while producer or consumer is active")]
    NotQuiesced,
}

/// Head/tail/fill bookkeeping for a circular buffer of `capacity` elements.
///
/// Invariants: `fill_count <= capacity` and `tail == (head + fill_count) % capacity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingBufferRecord {
    capacity: usize,
    head: usize,
    tail: usize,
    fill_count: usize,
    total_produced: u64,
    total_consumed: u64,
}

impl RingBufferRecord {
    /// Create an empty record. Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            capacity,
            head: 0,
            tail: 0,
            fill_count: 0,
            total_produced: 0,
            total_consumed: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Next read offset
    pub fn head(&self) -> usize {
        self.head
    }

    /// Next write offset
    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn fill_count(&self) -> usize {
        self.fill_count
    }

    /// Readable elements before the wrap point
    pub fn fill_count_contiguous(&self) -> usize {
        self.fill_count.min(self.capacity - self.head)
    }

    pub fn space(&self) -> usize {
        self.capacity - self.fill_count
    }

    /// Writable elements before the wrap point
    pub fn space_contiguous(&self) -> usize {
        self.space().min(self.capacity - self.tail)
    }

    /// Elements produced since creation or the last clear
    pub fn total_produced(&self) -> u64 {
        self.total_produced
    }

    /// Elements consumed since creation or the last clear
    pub fn total_consumed(&self) -> u64 {
        self.total_consumed
    }

    /// Advance the tail after `amount` elements were written at the old tail.
    pub fn produce(&mut self, amount: usize) -> Result<(), RingBufferError> {
        let available = self.space_contiguous();
        if amount > available {
            return Err(RingBufferError::CapacityExceeded {
                requested: amount,
                available,
            });
        }

        self.tail = (self.tail + amount) % self.capacity;
        self.fill_count += amount;
        self.total_produced += amount as u64;
        Ok(())
    }

    /// Advance the head after `amount` elements were read at the old head.
    pub fn consume(&mut self, amount: usize) -> Result<(), RingBufferError> {
        let available = self.fill_count_contiguous();
        if amount > available {
            return Err(RingBufferError::UnderrunViolation {
                requested: amount,
                available,
            });
        }

        self.head = (self.head + amount) % self.capacity;
        self.fill_count -= amount;
        self.total_consumed += amount as u64;
        Ok(())
    }

    /// Logical reset; the backing store is left untouched.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.fill_count = 0;
        self.total_produced = 0;
        self.total_consumed = 0;
    }
}

/// Bounded copy of one contiguous run.
///
/// Copies `min(num_elements, dst.len(), src.len())` elements and returns the
/// count. Element size is carried by `T`. Callers copy a wrapped run as two
/// calls, one before and one after the wrap point.
pub fn copy<T: Copy>(dst: &mut [T], src: &[T], num_elements: usize) -> usize {
    let count = num_elements.min(dst.len()).min(src.len());
    dst[..count].copy_from_slice(&src[..count]);
    count
}

struct Shared<T> {
    cells: Box<[UnsafeCell<T>]>,
    record: Mutex<RingBufferRecord>,
    producer_active: AtomicBool,
    consumer_active: AtomicBool,
}

// SAFETY: the producer only touches [tail, tail + space) and the consumer only
// touches [head, head + fill); the record (behind the mutex) keeps those
// regions disjoint, and role handles guarantee one writer and one reader.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Lock the record. The lock is never held across a copy or a panic site,
    /// so a poisoned mutex still holds consistent integers.
    fn record(&self) -> MutexGuard<'_, RingBufferRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// SAFETY: caller must own `[start, start + len)` under the role protocol
    /// and `start + len <= capacity`.
    #[allow(clippy::mut_from_ref)]
    unsafe fn region_mut(&self, start: usize, len: usize) -> &mut [T] {
        debug_assert!(start + len <= self.cells.len());
        let ptr = UnsafeCell::raw_get(self.cells.as_ptr().add(start));
        std::slice::from_raw_parts_mut(ptr, len)
    }

    /// SAFETY: as for `region_mut`.
    unsafe fn region(&self, start: usize, len: usize) -> &[T] {
        debug_assert!(start + len <= self.cells.len());
        let ptr = UnsafeCell::raw_get(self.cells.as_ptr().add(start));
        std::slice::from_raw_parts(ptr, len)
    }
}

/// Ring buffer statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferStats {
    /// Capacity in elements
    pub capacity: usize,

    /// Elements currently buffered
    pub fill_count: usize,

    /// Elements produced since the last clear
    pub total_produced: u64,

    /// Elements consumed since the last clear
    pub total_consumed: u64,
}

impl RingBufferStats {
    /// Buffer fill fraction (0.0 to 1.0)
    pub fn fill_percent(&self) -> f32 {
        self.fill_count as f32 / self.capacity as f32
    }
}

/// Fixed-capacity ring buffer with a one-time allocation.
///
/// Owned by the player. Producer and consumer access goes through the role
/// handles returned by [`RingBuffer::split`].
pub struct RingBuffer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Allocate the backing store. Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let cells = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shared: Arc::new(Shared {
                cells,
                record: Mutex::new(RingBufferRecord::new(capacity)),
                producer_active: AtomicBool::new(false),
                consumer_active: AtomicBool::new(false),
            }),
        }
    }
}

impl<T> RingBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.shared.cells.len()
    }

    pub fn fill_count(&self) -> usize {
        self.shared.record().fill_count()
    }

    pub fn space(&self) -> usize {
        self.shared.record().space()
    }

    /// Copy of the current bookkeeping
    pub fn snapshot(&self) -> RingBufferRecord {
        self.shared.record().clone()
    }

    pub fn stats(&self) -> RingBufferStats {
        let record = self.shared.record();
        RingBufferStats {
            capacity: record.capacity(),
            fill_count: record.fill_count(),
            total_produced: record.total_produced(),
            total_consumed: record.total_consumed(),
        }
    }

    /// True while a producer or consumer handle is alive
    pub fn is_split(&self) -> bool {
        self.shared.producer_active.load(Ordering::Acquire)
            || self.shared.consumer_active.load(Ordering::Acquire)
    }

    /// Hand out the producer and consumer roles.
    ///
    /// Fails with `RolesInUse` while handles from a previous split are alive.
    pub fn split(&self) -> Result<(RingProducer<T>, RingConsumer<T>), RingBufferError> {
        let shared = &self.shared;

        if shared
            .producer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RingBufferError::RolesInUse);
        }

        if shared
            .consumer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            shared.producer_active.store(false, Ordering::Release);
            return Err(RingBufferError::RolesInUse);
        }

        Ok((
            RingProducer {
                shared: Arc::clone(shared),
            },
            RingConsumer {
                shared: Arc::clone(shared),
            },
        ))
    }

    /// Reset head, tail and fill to zero.
    ///
    /// Only valid while both roles are quiesced (no live handles).
    pub fn clear(&self) -> Result<(), RingBufferError> {
        if self.is_split() {
            return Err(RingBufferError::NotQuiesced);
        }
        self.shared.record().clear();
        Ok(())
    }
}

/// Producer role: writes at the tail
pub struct RingProducer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> RingProducer<T> {
    pub fn capacity(&self) -> usize {
        self.shared.cells.len()
    }

    pub fn space(&self) -> usize {
        self.shared.record().space()
    }

    pub fn space_contiguous(&self) -> usize {
        self.shared.record().space_contiguous()
    }

    /// Elements still queued for the consumer
    pub fn fill_count(&self) -> usize {
        self.shared.record().fill_count()
    }

    /// The writable region starting at the tail, up to the wrap point.
    ///
    /// Write into it, then call [`RingProducer::produce`] with the amount written.
    pub fn write_region(&mut self) -> &mut [T] {
        let (tail, len) = {
            let record = self.shared.record();
            (record.tail(), record.space_contiguous())
        };
        // SAFETY: [tail, tail + len) is free space; only this handle writes it.
        unsafe { self.shared.region_mut(tail, len) }
    }

    /// Publish `amount` elements written into the region from `write_region`.
    pub fn produce(&mut self, amount: usize) -> Result<(), RingBufferError> {
        self.shared.record().produce(amount)
    }

    /// Copy as much of `src` as fits, using at most two contiguous copies.
    pub fn write(&mut self, src: &[T]) -> Result<usize, RingBufferError> {
        let mut written = 0;
        for _ in 0..2 {
            let remaining = &src[written..];
            if remaining.is_empty() {
                break;
            }
            let region = self.write_region();
            let count = copy(region, remaining, remaining.len());
            if count == 0 {
                break;
            }
            self.produce(count)?;
            written += count;
        }
        Ok(written)
    }
}

impl<T> Drop for RingProducer<T> {
    fn drop(&mut self) {
        self.shared.producer_active.store(false, Ordering::Release);
    }
}

/// Consumer role: reads at the head
pub struct RingConsumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> RingConsumer<T> {
    pub fn capacity(&self) -> usize {
        self.shared.cells.len()
    }

    pub fn fill_count(&self) -> usize {
        self.shared.record().fill_count()
    }

    pub fn fill_count_contiguous(&self) -> usize {
        self.shared.record().fill_count_contiguous()
    }

    /// The readable region starting at the head, up to the wrap point.
    pub fn read_region(&self) -> &[T] {
        let (head, len) = {
            let record = self.shared.record();
            (record.head(), record.fill_count_contiguous())
        };
        // SAFETY: [head, head + len) is filled data; the producer never writes it.
        unsafe { self.shared.region(head, len) }
    }

    /// All readable data as (pre-wrap, post-wrap) runs from one snapshot.
    ///
    /// Consume the first run before the second: `consume` never crosses the
    /// wrap point.
    pub fn readable_slices(&self) -> (&[T], &[T]) {
        let (head, first_len, second_len) = {
            let record = self.shared.record();
            let first = record.fill_count_contiguous();
            (record.head(), first, record.fill_count() - first)
        };
        // SAFETY: both runs lie inside [head, head + fill) modulo capacity.
        unsafe {
            (
                self.shared.region(head, first_len),
                self.shared.region(0, second_len),
            )
        }
    }

    /// Release `amount` elements read from the region at the head.
    pub fn consume(&mut self, amount: usize) -> Result<(), RingBufferError> {
        self.shared.record().consume(amount)
    }

    /// Copy up to `dst.len()` elements out, using at most two contiguous copies.
    pub fn read(&mut self, dst: &mut [T]) -> Result<usize, RingBufferError> {
        let mut read = 0;
        for _ in 0..2 {
            if read == dst.len() {
                break;
            }
            let count = {
                let region = self.read_region();
                let wanted = dst.len() - read;
                copy(&mut dst[read..], region, wanted)
            };
            if count == 0 {
                break;
            }
            self.consume(count)?;
            read += count;
        }
        Ok(read)
    }
}

impl<T> Drop for RingConsumer<T> {
    fn drop(&mut self) {
        self.shared.consumer_active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_starts_empty() {
        let record = RingBufferRecord::new(16);
        assert_eq!(record.fill_count(), 0);
        assert_eq!(record.space(), 16);
        assert_eq!(record.space_contiguous(), 16);
        assert_eq!(record.fill_count_contiguous(), 0);
    }

    #[test]
    fn test_wrap_limits_contiguous_space() {
        let mut record = RingBufferRecord::new(16);
        record.produce(10).unwrap();
        record.consume(4).unwrap();

        assert_eq!(record.fill_count(), 6);
        assert_eq!(record.space(), 10);
        assert_eq!(record.space_contiguous(), 6);
        assert_eq!(record.fill_count_contiguous(), 6);
    }

    #[test]
    fn test_produce_past_space_is_capacity_exceeded() {
        let mut record = RingBufferRecord::new(8);
        record.produce(6).unwrap();

        let err = record.produce(3).unwrap_err();
        assert_eq!(
            err,
            RingBufferError::CapacityExceeded {
                requested: 3,
                available: 2
            }
        );
        assert_eq!(record.fill_count(), 6);
    }

    #[test]
    fn test_consume_past_contiguous_fill_is_violation() {
        let mut record = RingBufferRecord::new(8);
        record.produce(8).unwrap();
        record.consume(6).unwrap();
        record.produce(4).unwrap();

        // 6 buffered: 2 before the wrap, 4 after
        assert_eq!(record.fill_count(), 6);
        assert_eq!(record.fill_count_contiguous(), 2);
        assert!(matches!(
            record.consume(3),
            Err(RingBufferError::UnderrunViolation { requested: 3, available: 2 })
        ));
    }

    #[test]
    fn test_clear_resets_counters() {
        let mut record = RingBufferRecord::new(8);
        record.produce(5).unwrap();
        record.consume(2).unwrap();
        record.clear();
        assert_eq!(record, RingBufferRecord::new(8));
    }

    #[test]
    fn test_copy_is_bounded() {
        let src = [1, 2, 3, 4, 5];
        let mut dst = [0; 3];
        assert_eq!(copy(&mut dst, &src, 10), 3);
        assert_eq!(dst, [1, 2, 3]);
        assert_eq!(copy(&mut dst, &src, 1), 1);
    }

    #[test]
    fn test_split_is_exclusive() {
        let ring = RingBuffer::<i16>::new(8);
        let (producer, consumer) = ring.split().unwrap();
        assert!(ring.is_split());
        assert!(matches!(ring.split(), Err(RingBufferError::RolesInUse)));
        assert_eq!(ring.clear(), Err(RingBufferError::NotQuiesced));

        drop(producer);
        assert!(matches!(ring.split(), Err(RingBufferError::RolesInUse)));
        drop(consumer);

        assert!(!ring.is_split());
        assert!(ring.clear().is_ok());
        assert!(ring.split().is_ok());
    }

    #[test]
    fn test_write_read_across_wrap() {
        let ring = RingBuffer::<i16>::new(8);
        let (mut producer, mut consumer) = ring.split().unwrap();

        assert_eq!(producer.write(&[1, 2, 3, 4, 5, 6]).unwrap(), 6);
        let mut out = [0i16; 4];
        assert_eq!(consumer.read(&mut out).unwrap(), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        // Tail at 6: two slots before the wrap, four after
        assert_eq!(producer.space_contiguous(), 2);
        assert_eq!(producer.write(&[7, 8, 9, 10, 11, 12]).unwrap(), 6);
        assert_eq!(producer.space(), 0);

        let (first, second) = consumer.readable_slices();
        assert_eq!(first, &[5, 6, 7, 8]);
        assert_eq!(second, &[9, 10, 11, 12]);

        let mut out = [0i16; 8];
        assert_eq!(consumer.read(&mut out).unwrap(), 8);
        assert_eq!(out, [5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(ring.stats().total_produced, 12);
        assert_eq!(ring.stats().total_consumed, 12);
    }

    #[test]
    fn test_write_into_full_buffer_writes_nothing() {
        let ring = RingBuffer::<i16>::new(4);
        let (mut producer, _consumer) = ring.split().unwrap();
        assert_eq!(producer.write(&[1, 2, 3, 4, 5]).unwrap(), 4);
        assert_eq!(producer.write(&[6]).unwrap(), 0);
        assert!(producer.write_region().is_empty());
    }
}
