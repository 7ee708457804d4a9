//! Shared worker-side emission plumbing.
//!
//! Filters that compute into scratch storage use [`push_samples`] to
//! append onto the staged output batch, flushing full batches as they
//! go, and [`flush_staged`] / [`complete_all`] on the way out. The
//! staging slot lives in the sink buffer itself, so partially filled
//! output batches survive across worker loop iterations without copies.

use ringpipe::{Backoff, BatchStatus, BufferError, Sample, Submitted};
use ringpipe_graph::WorkerCtx;
use std::any::Any;
use std::sync::Arc;
use tracing::trace;

/// Worker must exit: a buffer reported `Stopped` mid-emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PumpStopped;

/// Appends `samples` to the staged batch on `port`, submitting every
/// batch that fills. `t_first_ns`/`period_ns` time the samples;
/// timestamps of later flushes are advanced by the samples already
/// written. `meta` is attached to every batch this call starts.
///
/// Blocks (bounded by the sink's timeout, retried while the filter is
/// running) when the sink applies backpressure.
pub(crate) fn push_samples<T: Sample>(
    ctx: &WorkerCtx,
    port: usize,
    samples: &[T],
    t_first_ns: u64,
    period_ns: u32,
    meta: Option<&Arc<dyn Any + Send + Sync>>,
) -> Result<(), PumpStopped> {
    let mut rest = samples;
    let mut t_ns = t_first_ns;
    while !rest.is_empty() {
        if !ctx.is_running() {
            return Err(PumpStopped);
        }
        let mut out = ctx.stage(port);
        let cap = out.capacity();
        let filled = out.head();

        if filled == cap {
            let n = filled as u64;
            match out.submit(ctx.sink(port).expect("connected").timeout()) {
                Ok(Submitted::Published) => ctx.stats().record_out(n),
                Ok(Submitted::Dropped) => {}
                Err(BufferError::Timeout) => {} // backpressure: re-check running
                Err(BufferError::Stopped) => return Err(PumpStopped),
            }
            continue;
        }

        if filled == 0 {
            out.t_ns = t_ns;
            out.period_ns = period_ns;
            out.meta = meta.map(Arc::clone);
        }
        let n = rest.len().min(cap - filled);
        out.data_mut::<T>()[filled..filled + n].copy_from_slice(&rest[..n]);
        out.set_head(filled + n);
        rest = &rest[n..];
        t_ns += n as u64 * u64::from(period_ns);
    }
    Ok(())
}

/// Submits whatever is staged on `port` with `status`, best effort: a
/// sink that stays full past a short backoff is given up on. An `Ok`
/// status with nothing staged submits nothing; a `Complete` status is
/// always submitted, empty or not, so completion cascades.
pub(crate) fn flush_staged(ctx: &WorkerCtx, port: usize, status: BatchStatus) {
    let mut backoff = Backoff::new();
    loop {
        let mut out = ctx.stage(port);
        if out.head() == 0 && status == BatchStatus::Ok {
            return;
        }
        out.status = status;
        let n = out.head() as u64;
        match out.submit(ctx.sink(port).expect("connected").timeout()) {
            Ok(Submitted::Published) => {
                ctx.stats().record_out(n);
                return;
            }
            Err(BufferError::Stopped) => return,
            Ok(Submitted::Dropped) => {
                // Data batches may be shed, the terminator should not be:
                // give the consumer a moment to drain and retry.
                if status != BatchStatus::Complete || backoff.is_exhausted() {
                    return;
                }
                backoff.snooze();
            }
            Err(BufferError::Timeout) => {
                if backoff.is_exhausted() {
                    trace!(filter = ctx.name(), port, "gave up flushing into a full sink");
                    return;
                }
                backoff.snooze();
            }
        }
    }
}

/// Terminates every connected output: flushes staged samples and sends
/// `Complete` in the same batch. The exit path of every producing
/// worker.
pub(crate) fn complete_all(ctx: &WorkerCtx) {
    for port in 0..ctx.n_outputs() {
        if ctx.sink(port).is_some() {
            flush_staged(ctx, port, BatchStatus::Complete);
        }
    }
}
