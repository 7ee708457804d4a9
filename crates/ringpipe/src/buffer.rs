//! SPSC ring of preallocated batch slots.
//!
//! # Synchronization protocol
//!
//! One producer, one consumer, u64 sequence cursors:
//!
//! - `head` is written only by the producer (Release on publish) and read
//!   by the consumer with Acquire. The consumer's Acquire load of `head`
//!   happens-before it reads slot contents the producer published.
//! - `tail` is written only by the consumer (Release on release) and read
//!   by the producer with Acquire — except under the DropHead policy,
//!   where the producer may also advance `tail` to discard the oldest
//!   batch; every `tail` move then happens under the slot mutex.
//! - Each side caches the peer cursor in an `UnsafeCell` it alone
//!   writes, refreshing only when the cached view is insufficient.
//!
//! # Slot geometry
//!
//! `2^ring_expo` slots, of which at most `2^ring_expo - 1` are queued at
//! once. The slot at `head` is therefore never inside the queued window
//! `[tail, head)`: `get_head` can always hand out a writable staging slot
//! without blocking and without aliasing unconsumed data.
//!
//! # Slow path
//!
//! Waiting (consumer on empty, producer on full under Block) uses a
//! mutex + condvar pair. A waiter advertises itself in a waiter counter,
//! re-checks the condition, then waits; the signalling side pairs its
//! cursor store with a SeqCst fence before reading the waiter counter,
//! so a wakeup cannot be lost between check and sleep. Uncontended
//! submit/consume never touches the mutex.

use crate::batch::Batch;
use crate::config::{BufferConfig, Overflow};
use crate::dtype::DType;
use crate::error::{BufferError, ConfigError};
use crate::invariants::{
    debug_assert_bounded_occupancy, debug_assert_monotonic, debug_assert_tail_not_past_head,
};
use crate::stats::BufferStats;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Sentinel for "consumer holds no slot".
const HELD_NONE: u64 = u64::MAX;

/// Producer-only hot state. One cache line.
struct ProducerSide {
    /// Next publish sequence; slots `[tail, head)` are queued.
    head: AtomicU64,
    /// Producer's cached view of `tail` (avoids cross-core reads).
    cached_tail: UnsafeCell<u64>,
    /// Whether the staging slot has been handed out and not yet resolved.
    staged: UnsafeCell<bool>,
    /// Next batch id to stamp at staging time.
    next_batch_id: UnsafeCell<u64>,
    /// Batches published.
    total_batches: AtomicU64,
    /// Batches discarded by an overflow policy.
    dropped_batches: AtomicU64,
    /// Cumulative nanoseconds spent blocked on a full ring.
    blocked_ns: AtomicU64,
}

/// Consumer-only hot state. One cache line.
struct ConsumerSide {
    /// Next consume sequence.
    tail: AtomicU64,
    /// Consumer's cached view of `head`.
    cached_head: UnsafeCell<u64>,
}

/// Cold coordination state: the slow path and cross-side counters.
struct Waits {
    /// Force-return flag; supersedes Timeout for every blocked waiter.
    stopped: AtomicBool,
    /// Sequence of the slot the consumer currently holds, or `HELD_NONE`.
    /// Consulted by DropHead overflow so the held batch is never dropped.
    held: AtomicU64,
    /// Samples queued across all queued batches (exact backlog).
    queued_samples: AtomicU64,
    /// Consumers waiting on `not_empty`.
    rx_waiters: AtomicU32,
    /// Producers waiting on `not_full`.
    tx_waiters: AtomicU32,
    lock: Mutex<()>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Bounded FIFO of preallocated [`Batch`] slots between one producer and
/// one consumer.
///
/// The buffer is owned by the filter that consumes from it; the upstream
/// filter holds a non-owning reference and uses only the producer-side
/// API ([`get_head`]/[`submit`](HeadSlot::submit)). The owning filter
/// uses only the consumer-side API ([`get_tail`]/[`del_tail`]).
///
/// No allocation happens after construction.
///
/// [`get_head`]: BatchBuffer::get_head
/// [`get_tail`]: BatchBuffer::get_tail
/// [`del_tail`]: BatchBuffer::del_tail
pub struct BatchBuffer {
    producer: CachePadded<ProducerSide>,
    consumer: CachePadded<ConsumerSide>,
    waits: Waits,
    slots: Box<[UnsafeCell<Batch>]>,
    config: BufferConfig,
}

// SAFETY: the SPSC protocol guarantees each UnsafeCell has exactly one
// writer (cached cursors and `staged` belong to one side; slot contents
// are handed between sides by the cursor protocol described in the
// module docs). Batch payloads are plain data plus Send+Sync meta.
unsafe impl Send for BatchBuffer {}
unsafe impl Sync for BatchBuffer {}

/// Outcome of a successful submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// The batch was published to the ring.
    Published,
    /// The batch was discarded by the DropTail policy (or DropHead with
    /// the oldest batch in the consumer's hands). Counted in
    /// `dropped_batches`.
    Dropped,
}

impl BatchBuffer {
    /// Builds a buffer, preallocating every slot payload.
    pub fn new(config: BufferConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let n_slots = config.n_slots();
        let mut slots = Vec::with_capacity(n_slots);
        for _ in 0..n_slots {
            slots.push(UnsafeCell::new(Batch::new(
                config.dtype,
                config.batch_capacity(),
            )));
        }

        Ok(Self {
            producer: CachePadded::new(ProducerSide {
                head: AtomicU64::new(0),
                cached_tail: UnsafeCell::new(0),
                staged: UnsafeCell::new(false),
                next_batch_id: UnsafeCell::new(0),
                total_batches: AtomicU64::new(0),
                dropped_batches: AtomicU64::new(0),
                blocked_ns: AtomicU64::new(0),
            }),
            consumer: CachePadded::new(ConsumerSide {
                tail: AtomicU64::new(0),
                cached_head: UnsafeCell::new(0),
            }),
            waits: Waits {
                stopped: AtomicBool::new(false),
                held: AtomicU64::new(HELD_NONE),
                queued_samples: AtomicU64::new(0),
                rx_waiters: AtomicU32::new(0),
                tx_waiters: AtomicU32::new(0),
                lock: Mutex::new(()),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            },
            slots: slots.into_boxed_slice(),
            config,
        })
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    /// Buffer name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Declared element type.
    #[inline]
    pub fn dtype(&self) -> DType {
        self.config.dtype
    }

    /// Bytes per sample.
    #[inline]
    pub fn data_width(&self) -> usize {
        self.config.data_width()
    }

    /// Samples per batch slot.
    #[inline]
    pub fn batch_capacity(&self) -> usize {
        self.config.batch_capacity()
    }

    /// Batches that can be queued at once.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    /// Overflow policy.
    #[inline]
    pub fn overflow(&self) -> Overflow {
        self.config.overflow
    }

    /// Default bounded-wait duration.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    #[inline]
    fn mask(&self) -> usize {
        self.config.mask()
    }

    /// Batches currently queued.
    #[inline]
    pub fn available(&self) -> usize {
        let head = self.producer.head.load(Ordering::Relaxed);
        let tail = self.consumer.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail) as usize
    }

    /// `true` when nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// `true` when a further publish would need the overflow policy.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.available() >= self.capacity()
    }

    /// `true` after [`stop`](Self::stop).
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.waits.stopped.load(Ordering::Acquire)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            total_batches: self.producer.total_batches.load(Ordering::Relaxed),
            dropped_batches: self.producer.dropped_batches.load(Ordering::Relaxed),
            queued_batches: self.available(),
            queued_samples: self.waits.queued_samples.load(Ordering::Relaxed),
            blocked: Duration::from_nanos(self.producer.blocked_ns.load(Ordering::Relaxed)),
        }
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Returns the staging slot for the next batch. Never blocks.
    ///
    /// A freshly staged slot has a cleared header and a new `batch_id`;
    /// after a submit that timed out, the same slot comes back with its
    /// contents intact so the producer can retry.
    ///
    /// Must only be called by the single producer wired to this buffer.
    pub fn get_head(&self) -> HeadSlot<'_> {
        let head = self.producer.head.load(Ordering::Relaxed);
        let idx = (head as usize) & self.mask();

        // SAFETY: slot geometry keeps `head & mask` outside the queued
        // window, so the single producer has exclusive access to it.
        let batch = unsafe { &mut *self.slots[idx].get() };

        // SAFETY: `staged` and `next_batch_id` are producer-only cells.
        unsafe {
            let staged = &mut *self.producer.staged.get();
            if !*staged {
                let id = &mut *self.producer.next_batch_id.get();
                batch.reset_for_stage(*id);
                *id += 1;
                *staged = true;
            }
        }

        HeadSlot { buf: self, batch }
    }

    /// Publishes the staged slot, applying the overflow policy when full.
    fn submit_staged(&self, timeout: Duration) -> Result<Submitted, BufferError> {
        // SAFETY: producer-only cell.
        debug_assert!(unsafe { *self.producer.staged.get() }, "submit without get_head");

        let head = self.producer.head.load(Ordering::Relaxed);
        let tail = self.load_tail_cached(head);

        if head.wrapping_sub(tail) as usize >= self.capacity() {
            match self.config.overflow {
                Overflow::Block => {
                    self.wait_not_full(head, timeout)?;
                }
                Overflow::DropHead => {
                    if !self.drop_oldest(head) {
                        return Ok(Submitted::Dropped);
                    }
                }
                Overflow::DropTail => {
                    self.producer.dropped_batches.fetch_add(1, Ordering::Relaxed);
                    trace!(buffer = %self.config.name, "overflow: dropped incoming batch");
                    // SAFETY: producer-only cell.
                    unsafe { *self.producer.staged.get() = false };
                    return Ok(Submitted::Dropped);
                }
            }
        }

        // Publish.
        let idx = (head as usize) & self.mask();
        // SAFETY: producer still owns the staging slot.
        let n_samples = unsafe { (*self.slots[idx].get()).head() } as u64;

        debug_assert_bounded_occupancy!(
            head.wrapping_add(1)
                .wrapping_sub(self.consumer.tail.load(Ordering::Relaxed)) as usize,
            self.capacity()
        );
        debug_assert_monotonic!("head", head, head.wrapping_add(1));

        self.waits
            .queued_samples
            .fetch_add(n_samples, Ordering::Relaxed);
        self.producer.total_batches.fetch_add(1, Ordering::Relaxed);
        // SAFETY: producer-only cell.
        unsafe { *self.producer.staged.get() = false };

        // Slot contents are written before this Release store; the
        // consumer's Acquire load of `head` pairs with it.
        self.producer
            .head
            .store(head.wrapping_add(1), Ordering::Release);

        // Pairs with the waiter's fence in wait_not_empty: either this
        // read sees the waiter, or the waiter's re-check sees the new head.
        fence(Ordering::SeqCst);
        if self.waits.rx_waiters.load(Ordering::Relaxed) > 0 {
            let _guard = self.waits.lock.lock().unwrap();
            self.waits.not_empty.notify_all();
        }

        Ok(Submitted::Published)
    }

    /// DropHead overflow: discard the oldest queued batch, unless the
    /// consumer holds it — then the incoming batch is dropped instead.
    /// Returns `true` when the staged batch should still be published.
    fn drop_oldest(&self, head: u64) -> bool {
        let _guard = self.waits.lock.lock().unwrap();

        let tail = self.consumer.tail.load(Ordering::Acquire);
        if (head.wrapping_sub(tail) as usize) < self.capacity() {
            // Consumer caught up while we took the lock.
            return true;
        }

        self.producer.dropped_batches.fetch_add(1, Ordering::Relaxed);

        if self.waits.held.load(Ordering::Relaxed) == tail {
            trace!(buffer = %self.config.name, "overflow: oldest batch held, dropped incoming");
            // SAFETY: producer-only cell.
            unsafe { *self.producer.staged.get() = false };
            return false;
        }

        let idx = (tail as usize) & self.mask();
        // SAFETY: consumer cursor moves are serialized by the slot mutex
        // under DropHead, and `held != tail` means the consumer is not
        // inside this slot.
        let old = unsafe { &mut *self.slots[idx].get() };
        let dropped_samples = old.head() as u64;
        old.finish_consumed();

        self.consumer
            .tail
            .store(tail.wrapping_add(1), Ordering::Release);
        self.waits
            .queued_samples
            .fetch_sub(dropped_samples, Ordering::Relaxed);
        trace!(buffer = %self.config.name, "overflow: dropped oldest batch");
        true
    }

    /// Producer slow path: bounded wait for ring space.
    fn wait_not_full(&self, head: u64, timeout: Duration) -> Result<(), BufferError> {
        let start = Instant::now();
        let mut guard = self.waits.lock.lock().unwrap();
        let result = loop {
            if self.waits.stopped.load(Ordering::Acquire) {
                break Err(BufferError::Stopped);
            }
            let tail = self.consumer.tail.load(Ordering::Acquire);
            if (head.wrapping_sub(tail) as usize) < self.capacity() {
                // SAFETY: producer-only cell.
                unsafe { *self.producer.cached_tail.get() = tail };
                break Ok(());
            }

            self.waits.tx_waiters.fetch_add(1, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            // Re-check after advertising; pairs with the releasing side's
            // fence so the wakeup cannot fall between check and sleep.
            let tail = self.consumer.tail.load(Ordering::SeqCst);
            if (head.wrapping_sub(tail) as usize) < self.capacity()
                || self.waits.stopped.load(Ordering::SeqCst)
            {
                self.waits.tx_waiters.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            let Some(remaining) = timeout.checked_sub(start.elapsed()) else {
                self.waits.tx_waiters.fetch_sub(1, Ordering::SeqCst);
                break Err(BufferError::Timeout);
            };
            let (g, _) = self.waits.not_full.wait_timeout(guard, remaining).unwrap();
            guard = g;
            self.waits.tx_waiters.fetch_sub(1, Ordering::SeqCst);
        };
        drop(guard);

        self.producer
            .blocked_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        result
    }

    /// Producer view of `tail`, refreshed only when the cache is stale
    /// enough to matter.
    fn load_tail_cached(&self, head: u64) -> u64 {
        // SAFETY: producer-only cell.
        let cached = unsafe { *self.producer.cached_tail.get() };
        if (head.wrapping_sub(cached) as usize) < self.capacity() {
            return cached;
        }
        let tail = self.consumer.tail.load(Ordering::Acquire);
        // SAFETY: producer-only cell.
        unsafe { *self.producer.cached_tail.get() = tail };
        tail
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Returns the oldest queued batch, waiting up to `timeout` if the
    /// ring is empty.
    ///
    /// Fast path returns immediately when non-empty. A stopped buffer
    /// still drains queued batches; only the empty-and-waiting case
    /// returns [`BufferError::Stopped`].
    ///
    /// Must only be called by the owning filter's worker.
    pub fn get_tail(&self, timeout: Duration) -> Result<TailSlot<'_>, BufferError> {
        let start = Instant::now();
        loop {
            if let Some(slot) = self.try_claim_tail() {
                return Ok(slot);
            }
            let remaining = timeout
                .checked_sub(start.elapsed())
                .ok_or(BufferError::Timeout)?;
            self.wait_not_empty(remaining)?;
        }
    }

    /// Non-blocking claim of the tail slot.
    fn try_claim_tail(&self) -> Option<TailSlot<'_>> {
        if self.config.overflow == Overflow::DropHead {
            // Tail may be moved by the producer; claim under the mutex.
            let _guard = self.waits.lock.lock().unwrap();
            let tail = self.consumer.tail.load(Ordering::Relaxed);
            let head = self.producer.head.load(Ordering::Acquire);
            if head == tail {
                return None;
            }
            self.waits.held.store(tail, Ordering::Relaxed);
            Some(self.tail_slot(tail))
        } else {
            let tail = self.consumer.tail.load(Ordering::Relaxed);
            let head = self.load_head_cached(tail)?;
            debug_assert!(head != tail);
            self.waits.held.store(tail, Ordering::Relaxed);
            Some(self.tail_slot(tail))
        }
    }

    fn tail_slot(&self, tail: u64) -> TailSlot<'_> {
        let idx = (tail as usize) & self.mask();
        // SAFETY: `[tail, head)` slots were published by the producer's
        // Release store of `head` and our Acquire load observed it; the
        // single consumer has exclusive access until release.
        let batch = unsafe { &mut *self.slots[idx].get() };
        TailSlot {
            buf: self,
            batch,
            finished: false,
        }
    }

    /// Consumer view of `head`; `None` when empty after a refresh.
    fn load_head_cached(&self, tail: u64) -> Option<u64> {
        // SAFETY: consumer-only cell.
        let cached = unsafe { *self.consumer.cached_head.get() };
        if cached != tail {
            return Some(cached);
        }
        let head = self.producer.head.load(Ordering::Acquire);
        // SAFETY: consumer-only cell.
        unsafe { *self.consumer.cached_head.get() = head };
        (head != tail).then_some(head)
    }

    /// Consumer slow path: bounded wait for data.
    fn wait_not_empty(&self, timeout: Duration) -> Result<(), BufferError> {
        let start = Instant::now();
        let mut guard = self.waits.lock.lock().unwrap();
        loop {
            if self.waits.stopped.load(Ordering::Acquire) {
                return Err(BufferError::Stopped);
            }
            let tail = self.consumer.tail.load(Ordering::Relaxed);
            let head = self.producer.head.load(Ordering::Acquire);
            if head != tail {
                return Ok(());
            }

            self.waits.rx_waiters.fetch_add(1, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            let head = self.producer.head.load(Ordering::SeqCst);
            if head != tail || self.waits.stopped.load(Ordering::SeqCst) {
                self.waits.rx_waiters.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            let Some(remaining) = timeout.checked_sub(start.elapsed()) else {
                self.waits.rx_waiters.fetch_sub(1, Ordering::SeqCst);
                return Err(BufferError::Timeout);
            };
            let (g, _) = self.waits.not_empty.wait_timeout(guard, remaining).unwrap();
            guard = g;
            self.waits.rx_waiters.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Releases the tail slot back to the ring and advances the consumer
    /// cursor. Prefer [`TailSlot::finish`]; this form exists for workers
    /// that dropped the guard early.
    pub fn del_tail(&self) {
        let tail = self.consumer.tail.load(Ordering::Relaxed);
        let head = self.producer.head.load(Ordering::Acquire);
        if head == tail {
            return;
        }
        debug_assert_tail_not_past_head!(tail.wrapping_add(1), head);

        let idx = (tail as usize) & self.mask();
        // SAFETY: the consumer owns the tail slot until the cursor moves.
        let batch = unsafe { &mut *self.slots[idx].get() };
        let consumed = batch.head() as u64;
        batch.finish_consumed();

        debug_assert_monotonic!("tail", tail, tail.wrapping_add(1));
        {
            // Tail moves are serialized with producer drops under DropHead.
            let _guard = (self.config.overflow == Overflow::DropHead)
                .then(|| self.waits.lock.lock().unwrap());
            self.waits.held.store(HELD_NONE, Ordering::Relaxed);
            self.consumer
                .tail
                .store(tail.wrapping_add(1), Ordering::Release);
        }
        self.waits
            .queued_samples
            .fetch_sub(consumed, Ordering::Relaxed);

        // Pairs with the producer's re-check fence in wait_not_full.
        fence(Ordering::SeqCst);
        if self.waits.tx_waiters.load(Ordering::Relaxed) > 0 {
            let _guard = self.waits.lock.lock().unwrap();
            self.waits.not_full.notify_all();
        }
    }

    fn release_hold(&self) {
        let _guard = (self.config.overflow == Overflow::DropHead)
            .then(|| self.waits.lock.lock().unwrap());
        self.waits.held.store(HELD_NONE, Ordering::Relaxed);
    }

    // ---------------------------------------------------------------------
    // CONTROL
    // ---------------------------------------------------------------------

    /// Force-returns every current and future blocking call with
    /// [`BufferError::Stopped`]. Queued batches remain drainable.
    pub fn stop(&self) {
        self.waits.stopped.store(true, Ordering::SeqCst);
        let _guard = self.waits.lock.lock().unwrap();
        self.waits.not_empty.notify_all();
        self.waits.not_full.notify_all();
        debug!(buffer = %self.config.name, "buffer stopped");
    }

    /// Returns the buffer to its initial queue state: cursors rewound,
    /// stop flag cleared, staging discarded. Lifetime counters
    /// (`total_batches`, `dropped_batches`, blocked time) are retained.
    ///
    /// Both sides must be quiescent: the owning filter stopped and the
    /// upstream producer not mid-submit.
    pub fn reset(&self) {
        let _guard = self.waits.lock.lock().unwrap();
        self.producer.head.store(0, Ordering::SeqCst);
        self.consumer.tail.store(0, Ordering::SeqCst);
        // SAFETY: quiescence contract — no producer or consumer is active.
        unsafe {
            *self.producer.cached_tail.get() = 0;
            *self.consumer.cached_head.get() = 0;
            *self.producer.staged.get() = false;
        }
        self.waits.held.store(HELD_NONE, Ordering::SeqCst);
        self.waits.queued_samples.store(0, Ordering::SeqCst);
        self.waits.stopped.store(false, Ordering::SeqCst);
    }
}

/// Producer staging slot: mutable access to the batch at `head`.
///
/// Obtained from [`BatchBuffer::get_head`]; resolved by
/// [`submit`](Self::submit). Dropping the guard without submitting keeps
/// the staged contents for the next `get_head`.
pub struct HeadSlot<'a> {
    buf: &'a BatchBuffer,
    batch: *mut Batch,
}

impl Deref for HeadSlot<'_> {
    type Target = Batch;

    #[inline]
    fn deref(&self) -> &Batch {
        // SAFETY: the producer owns the staging slot for the guard's life.
        unsafe { &*self.batch }
    }
}

impl DerefMut for HeadSlot<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Batch {
        // SAFETY: as in Deref; &mut self gives exclusivity.
        unsafe { &mut *self.batch }
    }
}

impl HeadSlot<'_> {
    /// Publishes this batch.
    ///
    /// On a full ring: Block waits up to `timeout` (wait-then-publish, so
    /// a `Timeout` leaves the staged batch intact for retry), DropHead
    /// discards the oldest queued batch, DropTail discards this one.
    pub fn submit(self, timeout: Duration) -> Result<Submitted, BufferError> {
        self.buf.submit_staged(timeout)
    }
}

/// Consumer view of the oldest queued batch.
///
/// Deref-mut so the consumer can advance the in-batch read cursor for
/// partial drains. [`finish`](Self::finish) releases the slot back to the
/// ring; dropping the guard without finishing keeps the batch queued
/// (with its cursor) for the next [`BatchBuffer::get_tail`].
pub struct TailSlot<'a> {
    buf: &'a BatchBuffer,
    batch: *mut Batch,
    finished: bool,
}

impl std::fmt::Debug for TailSlot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailSlot")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Deref for TailSlot<'_> {
    type Target = Batch;

    #[inline]
    fn deref(&self) -> &Batch {
        // SAFETY: the consumer owns the tail slot for the guard's life;
        // DropHead producers skip the held slot.
        unsafe { &*self.batch }
    }
}

impl DerefMut for TailSlot<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Batch {
        // SAFETY: as in Deref.
        unsafe { &mut *self.batch }
    }
}

impl TailSlot<'_> {
    /// Consumes the guard and releases the slot (`del_tail`).
    pub fn finish(mut self) {
        self.finished = true;
        self.buf.del_tail();
    }
}

impl Drop for TailSlot<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.buf.release_hold();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchStatus;
    use crate::dtype::DType;

    const T: Duration = Duration::from_millis(50);

    fn small(overflow: Overflow) -> BatchBuffer {
        BatchBuffer::new(
            BufferConfig::new("test", DType::U32)
                .with_ring_expo(2) // 3 usable slots
                .with_batch_expo(2) // 4 samples
                .with_overflow(overflow),
        )
        .unwrap()
    }

    fn push(buf: &BatchBuffer, values: &[u32]) -> Submitted {
        let mut slot = buf.get_head();
        slot.data_mut::<u32>()[..values.len()].copy_from_slice(values);
        slot.set_head(values.len());
        slot.submit(T).unwrap()
    }

    #[test]
    fn test_fifo_roundtrip() {
        let buf = small(Overflow::Block);
        push(&buf, &[1, 2]);
        push(&buf, &[3]);

        let slot = buf.get_tail(T).unwrap();
        assert_eq!(slot.samples::<u32>(), &[1, 2]);
        slot.finish();

        let slot = buf.get_tail(T).unwrap();
        assert_eq!(slot.samples::<u32>(), &[3]);
        slot.finish();

        assert!(buf.is_empty());
    }

    #[test]
    fn test_batch_ids_monotonic() {
        let buf = small(Overflow::Block);
        push(&buf, &[1]);
        push(&buf, &[2]);

        let a = buf.get_tail(T).unwrap().batch_id;
        buf.del_tail();
        let b = buf.get_tail(T).unwrap().batch_id;
        buf.del_tail();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_block_times_out_when_full() {
        let buf = small(Overflow::Block);
        for i in 0..3 {
            assert_eq!(push(&buf, &[i]), Submitted::Published);
        }
        assert!(buf.is_full());

        let mut slot = buf.get_head();
        slot.set_head(1);
        let err = slot.submit(Duration::from_millis(5)).unwrap_err();
        assert_eq!(err, BufferError::Timeout);

        // Staged batch survives a timeout; retry succeeds after a drain.
        buf.get_tail(T).unwrap().finish();
        let slot = buf.get_head();
        assert_eq!(slot.submit(T).unwrap(), Submitted::Published);
        assert_eq!(buf.stats().total_batches, 4);
    }

    #[test]
    fn test_drop_tail_keeps_oldest_window() {
        let buf = small(Overflow::DropTail);
        for i in 0..5u32 {
            push(&buf, &[i]);
        }
        let stats = buf.stats();
        assert_eq!(stats.dropped_batches, 2);
        assert_eq!(stats.total_batches, 3);

        // Oldest three batches survive.
        for expect in 0..3u32 {
            let slot = buf.get_tail(T).unwrap();
            assert_eq!(slot.samples::<u32>(), &[expect]);
            slot.finish();
        }
    }

    #[test]
    fn test_drop_head_keeps_newest_window() {
        let buf = small(Overflow::DropHead);
        for i in 0..5u32 {
            push(&buf, &[i]);
        }
        let stats = buf.stats();
        assert_eq!(stats.dropped_batches, 2);

        // Newest three batches survive.
        for expect in 2..5u32 {
            let slot = buf.get_tail(T).unwrap();
            assert_eq!(slot.samples::<u32>(), &[expect]);
            slot.finish();
        }
    }

    #[test]
    fn test_drop_head_spares_held_batch() {
        let buf = small(Overflow::DropHead);
        for i in 0..3u32 {
            push(&buf, &[i]);
        }

        let held = buf.get_tail(T).unwrap();
        assert_eq!(held.samples::<u32>(), &[0]);

        // Ring is full and the oldest batch is in our hands: the new
        // submission is the one that gets dropped.
        push(&buf, &[99]);
        assert_eq!(held.samples::<u32>(), &[0]);
        held.finish();

        assert_eq!(buf.stats().dropped_batches, 1);
        let slot = buf.get_tail(T).unwrap();
        assert_eq!(slot.samples::<u32>(), &[1]);
        slot.finish();
    }

    #[test]
    fn test_partial_drain_resumes() {
        let buf = small(Overflow::Block);
        push(&buf, &[1, 2, 3, 4]);

        {
            let mut slot = buf.get_tail(T).unwrap();
            assert_eq!(slot.samples::<u32>(), &[1, 2, 3, 4]);
            slot.advance_tail(2);
            // Dropped without finish: stays queued.
        }

        let slot = buf.get_tail(T).unwrap();
        assert_eq!(slot.samples::<u32>(), &[3, 4]);
        slot.finish();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_get_tail_timeout_on_empty() {
        let buf = small(Overflow::Block);
        let err = buf.get_tail(Duration::from_millis(5)).unwrap_err();
        assert_eq!(err, BufferError::Timeout);
    }

    #[test]
    fn test_stop_supersedes_timeout() {
        let buf = small(Overflow::Block);
        buf.stop();
        let err = buf.get_tail(Duration::from_secs(10)).unwrap_err();
        assert_eq!(err, BufferError::Stopped);
    }

    #[test]
    fn test_stopped_buffer_still_drains() {
        let buf = small(Overflow::Block);
        push(&buf, &[7]);
        buf.stop();

        let slot = buf.get_tail(T).unwrap();
        assert_eq!(slot.samples::<u32>(), &[7]);
        slot.finish();
        assert_eq!(buf.get_tail(T).unwrap_err(), BufferError::Stopped);
    }

    #[test]
    fn test_complete_batch_with_zero_samples() {
        let buf = small(Overflow::Block);
        let mut slot = buf.get_head();
        slot.status = BatchStatus::Complete;
        slot.set_head(0);
        slot.submit(T).unwrap();

        let slot = buf.get_tail(T).unwrap();
        assert!(slot.status.is_complete());
        assert_eq!(slot.len(), 0);
        slot.finish();
    }

    #[test]
    fn test_queued_samples_tracking() {
        let buf = small(Overflow::Block);
        push(&buf, &[1, 2, 3]);
        push(&buf, &[4]);
        assert_eq!(buf.stats().queued_samples, 4);
        assert_eq!(buf.stats().queued_batches, 2);

        buf.get_tail(T).unwrap().finish();
        assert_eq!(buf.stats().queued_samples, 1);
    }

    #[test]
    fn test_reset_rewinds_queue() {
        let buf = small(Overflow::Block);
        push(&buf, &[1]);
        buf.stop();
        buf.reset();

        assert!(buf.is_empty());
        assert!(!buf.is_stopped());
        // Counters survive reset.
        assert_eq!(buf.stats().total_batches, 1);
        push(&buf, &[2]);
        let slot = buf.get_tail(T).unwrap();
        assert_eq!(slot.samples::<u32>(), &[2]);
        slot.finish();
    }

    #[test]
    fn test_ring_of_one_slot() {
        let buf = BatchBuffer::new(
            BufferConfig::new("one", DType::U32)
                .with_ring_expo(1)
                .with_batch_expo(0),
        )
        .unwrap();
        assert_eq!(buf.capacity(), 1);

        push(&buf, &[1]);
        assert!(buf.is_full());

        // Second submit must block and time out while the slot is unconsumed.
        let mut slot = buf.get_head();
        slot.data_mut::<u32>()[0] = 2;
        slot.set_head(1);
        assert_eq!(
            slot.submit(Duration::from_millis(5)).unwrap_err(),
            BufferError::Timeout
        );

        buf.get_tail(T).unwrap().finish();
        let slot = buf.get_head();
        assert_eq!(slot.submit(T).unwrap(), Submitted::Published);
    }
}
