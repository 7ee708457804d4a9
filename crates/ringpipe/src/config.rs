//! Configuration for batch buffers.

use crate::dtype::DType;
use crate::error::ConfigError;
use std::time::Duration;

/// Largest supported ring exponent (64K slots).
pub const MAX_RING_EXPO: u8 = 16;

/// Largest supported batch exponent (1M samples per batch).
pub const MAX_BATCH_EXPO: u8 = 20;

/// What a full ring does with the next submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// Wait for the consumer, up to the submit timeout.
    #[default]
    Block,
    /// Discard the oldest queued batch to make room.
    DropHead,
    /// Discard the incoming batch.
    DropTail,
}

/// Configuration for a [`BatchBuffer`](crate::BatchBuffer).
///
/// `ring_expo` sizes the slot ring (`2^ring_expo` slots, one of which is
/// always the producer staging slot, so `2^ring_expo - 1` batches can be
/// queued). `batch_expo` sizes every slot payload (`2^batch_expo`
/// samples).
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Buffer name, used in logs and `describe` output.
    pub name: String,
    /// Element type of the payload.
    pub dtype: DType,
    /// Ring size as a power of 2. Valid range `1..=16`.
    pub ring_expo: u8,
    /// Batch capacity as a power of 2. Valid range `0..=20`.
    pub batch_expo: u8,
    /// Policy when the ring is full at submit time.
    pub overflow: Overflow,
    /// Default bounded-wait duration for blocking calls.
    pub timeout: Duration,
}

impl BufferConfig {
    /// Creates a configuration with defaults: 16 slots, 64-sample
    /// batches, blocking overflow, 10 ms timeout.
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
            ring_expo: 4,
            batch_expo: 6,
            overflow: Overflow::Block,
            timeout: Duration::from_millis(10),
        }
    }

    /// Sets the ring exponent.
    pub fn with_ring_expo(mut self, expo: u8) -> Self {
        self.ring_expo = expo;
        self
    }

    /// Sets the batch-capacity exponent.
    pub fn with_batch_expo(mut self, expo: u8) -> Self {
        self.batch_expo = expo;
        self
    }

    /// Sets the overflow policy.
    pub fn with_overflow(mut self, overflow: Overflow) -> Self {
        self.overflow = overflow;
        self
    }

    /// Sets the default wait timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::new("name", "must not be empty"));
        }
        if self.ring_expo < 1 || self.ring_expo > MAX_RING_EXPO {
            return Err(ConfigError::new(
                "ring_expo",
                format!("{} outside 1..={MAX_RING_EXPO}", self.ring_expo),
            ));
        }
        if self.batch_expo > MAX_BATCH_EXPO {
            return Err(ConfigError::new(
                "batch_expo",
                format!("{} outside 0..={MAX_BATCH_EXPO}", self.batch_expo),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::new("timeout", "must be non-zero"));
        }
        Ok(())
    }

    /// Number of slots in the ring, including the staging slot.
    #[inline]
    pub const fn n_slots(&self) -> usize {
        1 << self.ring_expo
    }

    /// Index mask for slot wrapping.
    #[inline]
    pub const fn mask(&self) -> usize {
        self.n_slots() - 1
    }

    /// Number of batches that can be queued at once.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.n_slots() - 1
    }

    /// Samples per batch slot.
    #[inline]
    pub const fn batch_capacity(&self) -> usize {
        1 << self.batch_expo
    }

    /// Bytes per sample, derived from the element type.
    #[inline]
    pub const fn data_width(&self) -> usize {
        self.dtype.size()
    }
}
