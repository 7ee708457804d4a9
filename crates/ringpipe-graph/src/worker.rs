//! Worker-side plumbing: the context handed to every worker thread,
//! shared counters, and best-effort completion propagation.

use crate::error::WorkerError;
use ringpipe::{Backoff, BatchBuffer, BatchStatus, BufferError, HeadSlot, TailSlot};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, trace};

/// Live processing counters, updated by the worker and read by the
/// management interface. Snapshot with [`FilterStats`].
#[derive(Debug, Default)]
pub struct SharedStats {
    batches_in: AtomicU64,
    samples_in: AtomicU64,
    batches_out: AtomicU64,
    samples_out: AtomicU64,
}

impl SharedStats {
    /// Records one consumed batch of `samples`.
    #[inline]
    pub fn record_in(&self, samples: u64) {
        self.batches_in.fetch_add(1, Ordering::Relaxed);
        self.samples_in.fetch_add(samples, Ordering::Relaxed);
    }

    /// Records one published batch of `samples`.
    #[inline]
    pub fn record_out(&self, samples: u64) {
        self.batches_out.fetch_add(1, Ordering::Relaxed);
        self.samples_out.fetch_add(samples, Ordering::Relaxed);
    }

    /// Point-in-time copy.
    pub fn snapshot(&self) -> FilterStats {
        FilterStats {
            batches_in: self.batches_in.load(Ordering::Relaxed),
            samples_in: self.samples_in.load(Ordering::Relaxed),
            batches_out: self.batches_out.load(Ordering::Relaxed),
            samples_out: self.samples_out.load(Ordering::Relaxed),
        }
    }

    /// Rewinds all counters (filter `reset`).
    pub fn clear(&self) {
        self.batches_in.store(0, Ordering::Relaxed);
        self.samples_in.store(0, Ordering::Relaxed);
        self.batches_out.store(0, Ordering::Relaxed);
        self.samples_out.store(0, Ordering::Relaxed);
    }
}

/// Plain snapshot of a filter's processing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Batches consumed across all inputs.
    pub batches_in: u64,
    /// Samples consumed across all inputs.
    pub samples_in: u64,
    /// Batches published across all outputs.
    pub batches_out: u64,
    /// Samples published across all outputs.
    pub samples_out: u64,
}

/// Everything a worker thread owns while running: its filter's input
/// buffers, sink references, running flag, counters and fault slot.
///
/// The worker is the only thread that touches processing state; the
/// context is moved into the worker closure at `start`.
pub struct WorkerCtx {
    pub(crate) name: Arc<str>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) inputs: Vec<Arc<BatchBuffer>>,
    pub(crate) sinks: Vec<Option<Arc<BatchBuffer>>>,
    pub(crate) stats: Arc<SharedStats>,
    pub(crate) err: Arc<Mutex<Option<WorkerError>>>,
}

impl WorkerCtx {
    /// Filter name, for logging.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `false` once `stop` was requested; workers re-check this after
    /// every recoverable buffer error.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Input buffer `i`.
    ///
    /// # Panics
    ///
    /// Panics if the port does not exist; port counts are fixed at init.
    #[inline]
    pub fn input(&self, i: usize) -> &Arc<BatchBuffer> {
        &self.inputs[i]
    }

    /// Number of input ports.
    #[inline]
    pub fn n_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Sink buffer behind output port `i`, if connected.
    #[inline]
    pub fn sink(&self, i: usize) -> Option<&Arc<BatchBuffer>> {
        self.sinks.get(i).and_then(Option::as_ref)
    }

    /// Number of output ports (connected or not).
    #[inline]
    pub fn n_outputs(&self) -> usize {
        self.sinks.len()
    }

    /// Connected sinks, in port order.
    pub fn connected_sinks(&self) -> impl Iterator<Item = &Arc<BatchBuffer>> {
        self.sinks.iter().filter_map(Option::as_ref)
    }

    /// Shared processing counters.
    #[inline]
    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Bounded read from input `i` using the buffer's configured timeout.
    /// `Timeout`/`Stopped` are recoverable: re-check [`is_running`] and
    /// retry.
    ///
    /// [`is_running`]: Self::is_running
    pub fn recv(&self, i: usize) -> Result<TailSlot<'_>, BufferError> {
        let buf = &self.inputs[i];
        buf.get_tail(buf.timeout())
    }

    /// Staging slot on output port `i`.
    ///
    /// # Panics
    ///
    /// Panics if the port is not connected; workers only stage onto
    /// connected ports (wiring is validated before start).
    pub fn stage(&self, i: usize) -> HeadSlot<'_> {
        self.sinks[i]
            .as_ref()
            .expect("staging on unconnected output")
            .get_head()
    }

    /// Records a fatal worker fault. Only the first fault is kept.
    pub fn fail(&self, e: WorkerError) {
        error!(filter = %self.name, kind = %e.kind, "worker fault: {e}");
        let mut slot = self.err.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e);
        }
    }

    /// Submits a final empty `Complete` batch on every connected sink,
    /// best-effort: a sink that stays full past a short backoff, or that
    /// is already stopped, is skipped. Called once by every worker on the
    /// way out so completion cascades through the graph. Any samples
    /// still staged on a port are discarded; flush them first if they
    /// matter.
    pub fn propagate_complete(&self) {
        for sink in self.connected_sinks() {
            let mut backoff = Backoff::new();
            loop {
                let mut slot = sink.get_head();
                slot.status = BatchStatus::Complete;
                slot.set_head(0);
                match slot.submit(sink.timeout()) {
                    Ok(_) => break,
                    Err(BufferError::Stopped) => break,
                    Err(BufferError::Timeout) => {
                        if backoff.is_exhausted() {
                            trace!(
                                filter = %self.name,
                                sink = sink.name(),
                                "gave up propagating completion into a full sink"
                            );
                            break;
                        }
                        backoff.snooze();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker_error;
    use ringpipe::{BufferConfig, DType, ErrorKind};
    use std::time::Duration;

    fn ctx_with_sink() -> (WorkerCtx, Arc<BatchBuffer>) {
        let sink = Arc::new(
            BatchBuffer::new(BufferConfig::new("sink", DType::F32).with_ring_expo(2)).unwrap(),
        );
        let ctx = WorkerCtx {
            name: Arc::from("t"),
            running: Arc::new(AtomicBool::new(true)),
            inputs: vec![],
            sinks: vec![Some(Arc::clone(&sink)), None],
            stats: Arc::new(SharedStats::default()),
            err: Arc::new(Mutex::new(None)),
        };
        (ctx, sink)
    }

    #[test]
    fn test_propagate_complete_reaches_connected_sinks() {
        let (ctx, sink) = ctx_with_sink();
        ctx.propagate_complete();

        let slot = sink.get_tail(Duration::from_millis(10)).unwrap();
        assert!(slot.status.is_complete());
        assert_eq!(slot.len(), 0);
        slot.finish();
    }

    #[test]
    fn test_first_fault_wins() {
        let (ctx, _sink) = ctx_with_sink();
        ctx.fail(worker_error!(ErrorKind::Internal, "first"));
        ctx.fail(worker_error!(ErrorKind::Overflow, "second"));

        let err = ctx.err.lock().unwrap().clone().unwrap();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "first");
    }

    #[test]
    fn test_stats_roundtrip() {
        let stats = SharedStats::default();
        stats.record_in(10);
        stats.record_in(5);
        stats.record_out(15);

        let snap = stats.snapshot();
        assert_eq!(snap.batches_in, 2);
        assert_eq!(snap.samples_in, 15);
        assert_eq!(snap.batches_out, 1);
        assert_eq!(snap.samples_out, 15);

        stats.clear();
        assert_eq!(stats.snapshot(), FilterStats::default());
    }
}
