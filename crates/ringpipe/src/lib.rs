//! ringpipe - Batched SPSC Transport for Telemetry Pipelines
//!
//! The transport layer of a push-based, real-time telemetry runtime.
//! Producers fill preallocated [`Batch`] slots inside a [`BatchBuffer`]
//! ring; consumers drain them in FIFO order. The uncontended path is
//! lock-free; waiting (empty ring, full ring under backpressure) falls
//! back to a condvar slow path that honours per-call timeouts and a
//! force-return [`stop`](BatchBuffer::stop) signal.
//!
//! # Key Features
//!
//! - Cache-line separated producer/consumer cursor groups
//! - Preallocated batch slots: no allocation after construction
//! - Overflow policies: block, drop-oldest, drop-newest
//! - Stop signal that wakes every blocked waiter in bounded time
//!
//! # Example
//!
//! ```
//! use ringpipe::{BatchBuffer, BufferConfig, DType};
//! use std::time::Duration;
//!
//! let buf = BatchBuffer::new(BufferConfig::new("edge", DType::U32)).unwrap();
//!
//! // Producer side: stage, fill, submit
//! let mut slot = buf.get_head();
//! slot.t_ns = 0;
//! slot.period_ns = 1000;
//! slot.data_mut::<u32>()[..3].copy_from_slice(&[1, 2, 3]);
//! slot.set_head(3);
//! slot.submit(Duration::from_millis(10)).unwrap();
//!
//! // Consumer side: read, release
//! let tail = buf.get_tail(Duration::from_millis(10)).unwrap();
//! assert_eq!(tail.samples::<u32>(), &[1, 2, 3]);
//! tail.finish();
//! ```

mod backoff;
mod batch;
mod buffer;
mod config;
mod dtype;
mod error;
mod invariants;
mod stats;

pub use backoff::Backoff;
pub use batch::{Batch, BatchStatus};
pub use buffer::{BatchBuffer, HeadSlot, Submitted, TailSlot};
pub use config::{BufferConfig, Overflow, MAX_BATCH_EXPO, MAX_RING_EXPO};
pub use dtype::{DType, Sample};
pub use error::{BufferError, ConfigError, ErrorKind};
pub use stats::BufferStats;
