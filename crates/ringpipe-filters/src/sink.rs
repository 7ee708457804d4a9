//! In-memory sinks: collect for inspection, or discard.

use crate::check_input_dtype;
use crate::gap_filler::GapFillMeta;
use ringpipe::{BatchStatus, BufferConfig, ErrorKind, Sample};
use ringpipe_graph::{Filter, FilterCore, FilterKind, GraphError, InputSpec, WorkerCtx};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Header snapshot of one received batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchInfo {
    /// Timestamp of the first sample.
    pub t_ns: u64,
    /// Inter-sample interval (0 = irregular).
    pub period_ns: u32,
    /// Samples carried.
    pub len: usize,
    /// Producer-assigned id.
    pub batch_id: u64,
    /// End-of-stream terminator flag.
    pub complete: bool,
    /// Batch was synthesized by a gap filler.
    pub interpolated: bool,
}

/// Everything a [`CollectSink`] received.
#[derive(Debug, Clone, Default)]
pub struct Collected<T> {
    /// Concatenated sample stream in arrival order.
    pub samples: Vec<T>,
    /// Per-batch headers in arrival order.
    pub batches: Vec<BatchInfo>,
    /// A `Complete` batch arrived.
    pub complete: bool,
    /// First fault status observed, if any.
    pub fault: Option<ErrorKind>,
}

/// Shared view into a [`CollectSink`]'s received data.
pub struct CollectHandle<T> {
    inner: Arc<(Mutex<Collected<T>>, Condvar)>,
}

impl<T> Clone for CollectHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Sample> CollectHandle<T> {
    /// Copy of everything received so far.
    pub fn snapshot(&self) -> Collected<T> {
        self.inner.0.lock().unwrap().clone()
    }

    /// Concatenated samples received so far.
    pub fn samples(&self) -> Vec<T> {
        self.inner.0.lock().unwrap().samples.clone()
    }

    /// Blocks until the stream completed or `timeout` elapsed. Returns
    /// `true` on completion.
    pub fn wait_complete(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cv) = &*self.inner;
        let mut guard = lock.lock().unwrap();
        while !guard.complete {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (g, _) = cv.wait_timeout(guard, remaining).unwrap();
            guard = g;
        }
        true
    }
}

/// Sink that stores every received sample and batch header, for tests,
/// demos and embedders that want the stream in memory.
#[derive(Debug)]
pub struct CollectSink<T: Sample> {
    core: FilterCore,
    inner: Arc<(Mutex<Collected<T>>, Condvar)>,
}

impl<T: Sample> CollectSink<T> {
    /// Builds a collecting sink owning one input buffer.
    pub fn new(name: impl Into<String>, input: BufferConfig) -> Result<Self, GraphError> {
        check_input_dtype::<T>(&input)?;
        let mut core = FilterCore::new(name, FilterKind::Sink);
        core.add_input(input, InputSpec::new())?;
        Ok(Self {
            core,
            inner: Arc::new((Mutex::new(Collected::default()), Condvar::new())),
        })
    }

    /// Handle for inspecting received data from other threads.
    pub fn handle(&self) -> CollectHandle<T> {
        CollectHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Sample> Filter for CollectSink<T> {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn start(&mut self) -> Result<(), GraphError> {
        let inner = Arc::clone(&self.inner);
        self.core.start_with(move |ctx| collect_worker::<T>(&ctx, &inner))
    }
}

fn collect_worker<T: Sample>(ctx: &WorkerCtx, inner: &Arc<(Mutex<Collected<T>>, Condvar)>) {
    while ctx.is_running() {
        let input = match ctx.recv(0) {
            Ok(slot) => slot,
            Err(_) => continue,
        };

        let interpolated = input
            .meta
            .as_ref()
            .is_some_and(|m| m.downcast_ref::<GapFillMeta>().is_some());
        let info = BatchInfo {
            t_ns: input.t_ns,
            period_ns: input.period_ns,
            len: input.len(),
            batch_id: input.batch_id,
            complete: input.status.is_complete(),
            interpolated,
        };

        let (lock, cv) = &**inner;
        {
            let mut collected = lock.lock().unwrap();
            collected.samples.extend_from_slice(input.samples::<T>());
            collected.batches.push(info);
            if let BatchStatus::Fault(kind) = input.status {
                collected.fault.get_or_insert(kind);
            }
            if input.status.is_complete() {
                collected.complete = true;
            }
        }

        ctx.stats().record_in(info.len as u64);
        let done = info.complete;
        input.finish();
        if done {
            cv.notify_all();
            return;
        }
    }
    // Stop path: wake any waiters so they observe the final state.
    inner.1.notify_all();
}

/// Sink that drains and discards, counting what passed through.
pub struct NullSink {
    core: FilterCore,
}

impl NullSink {
    /// Builds a discarding sink owning one input buffer of any type.
    pub fn new(name: impl Into<String>, input: BufferConfig) -> Result<Self, GraphError> {
        let mut core = FilterCore::new(name, FilterKind::Sink);
        core.add_input(input, InputSpec::new())?;
        Ok(Self { core })
    }
}

impl Filter for NullSink {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn start(&mut self) -> Result<(), GraphError> {
        self.core.start_with(|ctx| {
            while ctx.is_running() {
                let input = match ctx.recv(0) {
                    Ok(slot) => slot,
                    Err(_) => continue,
                };
                ctx.stats().record_in(input.len() as u64);
                let done = input.status.is_complete();
                input.finish();
                if done {
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringpipe::DType;

    #[test]
    fn test_collect_rejects_wrong_dtype() {
        let err =
            CollectSink::<f32>::new("c", BufferConfig::new("in", DType::U64)).unwrap_err();
        assert!(matches!(err, GraphError::InvalidConfig(_)));
    }

    #[test]
    fn test_wait_complete_times_out() {
        let sink = CollectSink::<f32>::new("c", BufferConfig::new("in", DType::F32)).unwrap();
        let handle = sink.handle();
        assert!(!handle.wait_complete(Duration::from_millis(5)));
    }
}
