//! The unit of transport: a header plus a fixed payload region.

use crate::dtype::{DType, Sample};
use crate::error::ErrorKind;
use crate::invariants::debug_assert_sample_window;
use std::any::Any;
use std::sync::Arc;

/// Status carried on every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchStatus {
    /// Normal data batch.
    #[default]
    Ok,
    /// Final batch of a stream. May carry trailing samples or none.
    Complete,
    /// Producer-side fault propagated downstream.
    Fault(ErrorKind),
}

impl BatchStatus {
    /// `true` for the end-of-stream terminator.
    #[inline]
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }

    /// `true` for a propagated producer fault.
    #[inline]
    pub fn is_fault(self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

/// A contiguous block of samples plus header metadata, moved as one unit.
///
/// Batches live inside preallocated ring slots and are reused; nothing is
/// allocated per batch after buffer construction. The payload is raw
/// 8-byte-aligned storage; all typed access goes through [`data`],
/// [`data_mut`] and [`samples`], which check the declared element type.
///
/// Header invariant: `tail <= head <= capacity`. `head` counts valid
/// samples written by the producer; `tail` is the consumer's read cursor
/// within the batch, used when a batch is drained across iterations.
///
/// [`data`]: Batch::data
/// [`data_mut`]: Batch::data_mut
/// [`samples`]: Batch::samples
pub struct Batch {
    /// Timestamp of the first sample, in nanoseconds since the source's
    /// monotonic epoch.
    pub t_ns: u64,
    /// Inter-sample interval in nanoseconds; `0` marks irregular sampling.
    pub period_ns: u32,
    /// Per-producer monotonic id; consumers detect drops by discontinuity.
    pub batch_id: u64,
    /// Batch status; `Complete` terminates the stream.
    pub status: BatchStatus,
    /// Opaque out-of-band annotation. Lifetime bound to the slot: released
    /// when the consumer finishes the batch.
    pub meta: Option<Arc<dyn Any + Send + Sync>>,

    head: usize,
    tail: usize,
    capacity: usize,
    dtype: DType,
    /// 8-byte-aligned backing storage; aligned for every element type.
    data: Box<[u64]>,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("t_ns", &self.t_ns)
            .field("period_ns", &self.period_ns)
            .field("batch_id", &self.batch_id)
            .field("status", &self.status)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("capacity", &self.capacity)
            .field("dtype", &self.dtype)
            .field("has_meta", &self.meta.is_some())
            .finish_non_exhaustive()
    }
}

impl Batch {
    pub(crate) fn new(dtype: DType, capacity: usize) -> Self {
        let bytes = capacity * dtype.size();
        let words = bytes.div_ceil(8);
        Self {
            t_ns: 0,
            period_ns: 0,
            batch_id: 0,
            status: BatchStatus::Ok,
            meta: None,
            head: 0,
            tail: 0,
            capacity,
            dtype,
            data: vec![0u64; words].into_boxed_slice(),
        }
    }

    /// Maximum samples this batch can hold. Fixed by buffer configuration.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Declared element type of the payload.
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Count of valid samples written by the producer.
    #[inline]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Consumer read cursor within the batch.
    #[inline]
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Unread samples remaining: `head - tail`.
    #[inline]
    pub fn len(&self) -> usize {
        self.head - self.tail
    }

    /// `true` when every valid sample has been consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tail == self.head
    }

    /// Sets the valid-sample count. Producer side.
    ///
    /// # Panics
    ///
    /// Panics if `head` exceeds the batch capacity.
    #[inline]
    pub fn set_head(&mut self, head: usize) {
        assert!(
            head <= self.capacity,
            "head {} exceeds batch capacity {}",
            head,
            self.capacity
        );
        self.head = head;
    }

    /// Advances the read cursor by `n` consumed samples. Consumer side.
    #[inline]
    pub fn advance_tail(&mut self, n: usize) {
        let tail = self.tail + n;
        debug_assert_sample_window!(tail, self.head, self.capacity);
        self.tail = tail.min(self.head);
    }

    /// Timestamp of the sample at the read cursor.
    ///
    /// For irregular batches (`period_ns == 0`) this is `t_ns` itself.
    #[inline]
    pub fn cursor_t_ns(&self) -> u64 {
        self.t_ns + self.tail as u64 * u64::from(self.period_ns)
    }

    /// Full payload region as a typed slice.
    ///
    /// # Panics
    ///
    /// Panics if `T` does not match the declared element type.
    #[inline]
    pub fn data<T: Sample>(&self) -> &[T] {
        self.check_dtype::<T>();
        // SAFETY: storage is 8-byte aligned (>= align_of::<T>() for every
        // element type), sized for `capacity` samples, and zero-initialized
        // at construction, so all bit patterns are valid for these scalar
        // types.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr().cast::<T>(), self.capacity) }
    }

    /// Full payload region as a mutable typed slice. Producer side.
    ///
    /// # Panics
    ///
    /// Panics if `T` does not match the declared element type.
    #[inline]
    pub fn data_mut<T: Sample>(&mut self) -> &mut [T] {
        self.check_dtype::<T>();
        // SAFETY: as in `data`; `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_mut_ptr().cast::<T>(), self.capacity) }
    }

    /// The unread sample window `[tail, head)`.
    ///
    /// # Panics
    ///
    /// Panics if `T` does not match the declared element type.
    #[inline]
    pub fn samples<T: Sample>(&self) -> &[T] {
        let (tail, head) = (self.tail, self.head);
        &self.data::<T>()[tail..head]
    }

    #[inline]
    fn check_dtype<T: Sample>(&self) {
        assert!(
            T::DTYPE == self.dtype,
            "typed access as {} on a {} batch",
            T::DTYPE,
            self.dtype
        );
    }

    /// Producer-side reset when a slot is freshly staged.
    pub(crate) fn reset_for_stage(&mut self, batch_id: u64) {
        self.t_ns = 0;
        self.period_ns = 0;
        self.batch_id = batch_id;
        self.status = BatchStatus::Ok;
        self.meta = None;
        self.head = 0;
        self.tail = 0;
    }

    /// Consumer-side cleanup before the slot is returned to the ring.
    /// Drops the meta annotation so its lifetime ends with the batch.
    pub(crate) fn finish_consumed(&mut self) {
        self.meta = None;
    }
}
