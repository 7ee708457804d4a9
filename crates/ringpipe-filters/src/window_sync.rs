//! N-way truncation to overlapping time ranges.

use crate::check_input_dtype;
use crate::pump::{complete_all, flush_staged, push_samples};
use ringpipe::{BatchStatus, BufferConfig, ConfigError, ErrorKind, Sample, TailSlot};
use ringpipe_graph::{
    worker_error, Constraint, Filter, FilterCore, FilterKind, GraphError, InputSpec, OutputSpec,
    Property, WorkerCtx,
};
use std::marker::PhantomData;

/// N-in/N-out synchronizer: output `i` mirrors input `i`, but only for
/// time ranges where every input has data. Leading samples outside the
/// overlap are discarded; batches wholly before the overlap are
/// dropped.
///
/// All inputs must be regular at the same period with timestamps on a
/// common grid, so each output step carries identical timestamps on
/// every port — the shape a downstream multi-input element-wise
/// operator may assume. Use [`SampleAligner`](crate::SampleAligner)
/// and [`Resampler`](crate::Resampler) upstream to establish it.
///
/// The stream ends for all outputs as soon as any input completes: no
/// further overlap can exist past a finished input.
#[derive(Debug)]
pub struct TimeWindowSync<T: Sample> {
    core: FilterCore,
    _marker: PhantomData<fn(T)>,
}

impl<T: Sample> TimeWindowSync<T> {
    /// Builds a synchronizer with one input buffer per config and a
    /// matching output port for each.
    pub fn new(name: impl Into<String>, inputs: Vec<BufferConfig>) -> Result<Self, GraphError> {
        if inputs.len() < 2 {
            return Err(ConfigError::new("inputs", "needs at least 2 ports").into());
        }

        let mut core = FilterCore::new(name, FilterKind::MultiInSync);
        for input in inputs {
            check_input_dtype::<T>(&input)?;
            core.add_input(
                input,
                InputSpec::new().constrain(Property::Regular, Constraint::Flag(true)),
            )?;
            core.add_output(
                T::DTYPE,
                OutputSpec::new()
                    .preserve(Property::PeriodNs)
                    .preserve(Property::Regular)
                    .preserve(Property::BatchPhaseNs),
            );
        }
        Ok(Self {
            core,
            _marker: PhantomData,
        })
    }
}

impl<T: Sample> Filter for TimeWindowSync<T> {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn start(&mut self) -> Result<(), GraphError> {
        self.core.start_with(|ctx| sync_worker::<T>(&ctx))
    }
}

enum Acquired<'a> {
    Slot(TailSlot<'a>),
    Finished,
    Fault(ErrorKind),
    Stopping,
}

/// Blocks until input `i` yields a batch with samples, or resolves the
/// stream state.
fn acquire(ctx: &WorkerCtx, i: usize) -> Acquired<'_> {
    loop {
        if !ctx.is_running() {
            return Acquired::Stopping;
        }
        match ctx.recv(i) {
            Ok(slot) => {
                if let BatchStatus::Fault(kind) = slot.status {
                    slot.finish();
                    return Acquired::Fault(kind);
                }
                if slot.is_empty() {
                    let complete = slot.status.is_complete();
                    slot.finish();
                    if complete {
                        return Acquired::Finished;
                    }
                    continue; // empty data batch: skip
                }
                return Acquired::Slot(slot);
            }
            Err(_) => {} // Timeout/Stopped: re-check running
        }
    }
}

fn sync_worker<T: Sample>(ctx: &WorkerCtx) {
    let n = ctx.n_inputs();

    'run: while ctx.is_running() {
        // One non-empty batch per input; any completed input ends the
        // whole sync.
        let mut slots: Vec<TailSlot<'_>> = Vec::with_capacity(n);
        for i in 0..n {
            match acquire(ctx, i) {
                Acquired::Slot(slot) => slots.push(slot),
                Acquired::Finished => {
                    complete_all(ctx);
                    return;
                }
                Acquired::Fault(kind) => {
                    for port in 0..n {
                        if ctx.sink(port).is_some() {
                            flush_staged(ctx, port, BatchStatus::Fault(kind));
                        }
                    }
                    complete_all(ctx);
                    return;
                }
                Acquired::Stopping => break 'run,
            }
        }

        // A common period is the contract for identical per-step stamps.
        let p = u64::from(slots[0].period_ns);
        if p == 0 || slots.iter().any(|s| u64::from(s.period_ns) != p) {
            ctx.fail(worker_error!(
                ErrorKind::TypeConstraintViolation,
                "window sync requires equal non-zero periods on all inputs"
            ));
            complete_all(ctx);
            return;
        }

        let start = slots.iter().map(|s| s.cursor_t_ns()).max().expect("n >= 2");
        let end = slots
            .iter()
            .map(|s| s.cursor_t_ns() + s.len() as u64 * p)
            .min()
            .expect("n >= 2");

        if end <= start {
            // Some batch lies wholly before the overlap: drop it and
            // re-acquire. The rest stay queued for the next round.
            for mut slot in slots {
                if slot.cursor_t_ns() + slot.len() as u64 * p <= start {
                    let len = slot.len();
                    slot.advance_tail(len);
                    ctx.stats().record_in(len as u64);
                    let complete = slot.status.is_complete();
                    slot.finish();
                    if complete {
                        complete_all(ctx);
                        return;
                    }
                }
            }
            continue;
        }

        let count = ((end - start) / p) as usize;
        let mut ended = false;
        for (i, mut slot) in slots.into_iter().enumerate() {
            let lead = start - slot.cursor_t_ns();
            if lead % p != 0 {
                ctx.fail(worker_error!(
                    ErrorKind::TypeConstraintViolation,
                    "input {i} timestamps are off the common grid by {} ns",
                    lead % p
                ));
                complete_all(ctx);
                return;
            }
            let skip = (lead / p) as usize;
            if ctx.sink(i).is_some() {
                let window = &slot.samples::<T>()[skip..skip + count];
                if push_samples::<T>(ctx, i, window, start, p as u32, None).is_err() {
                    break 'run;
                }
            }
            slot.advance_tail(skip + count);
            ctx.stats().record_in((skip + count) as u64);
            if slot.is_empty() {
                if slot.status.is_complete() {
                    ended = true;
                }
                slot.finish();
            }
        }
        if ended {
            complete_all(ctx);
            return;
        }
    }
    complete_all(ctx);
}
