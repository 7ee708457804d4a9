//! Batch re-framing onto zero-phase boundaries.

use crate::check_input_dtype;
use crate::map::refine_batch_capacity_from_sink;
use crate::pump::{complete_all, flush_staged};
use ringpipe::{BatchStatus, BufferConfig, BufferError, ErrorKind, Sample, Submitted};
use ringpipe_graph::{
    worker_error, Constraint, Filter, FilterCore, FilterKind, GraphError, InputSpec, OutputSpec,
    PropValue, Property, WorkerCtx,
};
use std::marker::PhantomData;

/// Re-frames a regular, grid-aligned stream so batch boundaries sit at
/// `anchor + k * batch_period` and batches match the sink's capacity.
///
/// The output length auto-detects from the connected sink. The frame
/// anchor defaults to the first sample's timestamp; with an explicit
/// [`with_anchor`](Self::with_anchor), samples before the anchor (or
/// between frame boundaries after a discontinuity) are dropped.
///
/// Requires regular input with integer sample phase; a stream whose
/// timestamps do not sit on their own period grid is rejected with a
/// `TypeConstraintViolation` — put a
/// [`SampleAligner`](crate::SampleAligner) upstream first.
pub struct BatchMatcher<T: Sample> {
    core: FilterCore,
    anchor: Option<u64>,
    refined: Option<usize>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Sample> BatchMatcher<T> {
    /// Builds a matcher; the frame anchor is the first sample seen.
    pub fn new(name: impl Into<String>, input: BufferConfig) -> Result<Self, GraphError> {
        check_input_dtype::<T>(&input)?;
        let mut core = FilterCore::new(name, FilterKind::Map);
        core.add_input(
            input,
            InputSpec::new()
                .constrain(Property::Regular, Constraint::Flag(true))
                .constrain(Property::BatchPhaseNs, Constraint::Aligned),
        )?;
        core.add_output(
            T::DTYPE,
            OutputSpec::new()
                .preserve(Property::PeriodNs)
                .preserve(Property::Regular)
                .set(Property::BatchPhaseNs, PropValue::U64(0)),
        );
        Ok(Self {
            core,
            anchor: None,
            refined: None,
            _marker: PhantomData,
        })
    }

    /// Anchors the zero-phase frame explicitly; samples earlier than
    /// `t_ns` are dropped.
    pub fn with_anchor(mut self, t_ns: u64) -> Self {
        self.anchor = Some(t_ns);
        self
    }
}

impl<T: Sample> Filter for BatchMatcher<T> {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn refine_outputs(&mut self) -> bool {
        refine_batch_capacity_from_sink(&mut self.core, &mut self.refined)
    }

    fn start(&mut self) -> Result<(), GraphError> {
        self.core.require_connected(0)?;
        let anchor = self.anchor;
        self.core
            .start_with(move |ctx| matcher_worker::<T>(&ctx, anchor))
    }
}

fn matcher_worker<T: Sample>(ctx: &WorkerCtx, configured_anchor: Option<u64>) {
    let mut anchor = configured_anchor;

    'run: while ctx.is_running() {
        let mut input = match ctx.recv(0) {
            Ok(slot) => slot,
            Err(_) => continue,
        };
        let consumed = input.len() as u64;

        if input.len() > 0 {
            let p = u64::from(input.period_ns);
            if p == 0 {
                ctx.fail(worker_error!(
                    ErrorKind::TypeConstraintViolation,
                    "irregular input cannot be batch-matched"
                ));
                input.finish();
                complete_all(ctx);
                return;
            }
            let t = input.cursor_t_ns();
            if t % p != 0 {
                ctx.fail(worker_error!(
                    ErrorKind::TypeConstraintViolation,
                    "non-integer sample phase {} (period {p})",
                    t % p
                ));
                input.finish();
                complete_all(ctx);
                return;
            }

            let a = *anchor.get_or_insert(t);
            if a % p != 0 {
                ctx.fail(worker_error!(
                    ErrorKind::TypeConstraintViolation,
                    "anchor {a} is off the sample grid (period {p})"
                ));
                input.finish();
                complete_all(ctx);
                return;
            }
            // Drop everything before the aligned frame starts.
            if t < a {
                let skip = (((a - t) / p) as usize).min(input.len());
                input.advance_tail(skip);
            }
        }

        while input.len() > 0 {
            if !ctx.is_running() {
                break 'run;
            }
            let mut out = ctx.stage(0);
            let frame_len = out.capacity();
            let frame_period = frame_len as u64 * u64::from(input.period_ns);
            let p = u64::from(input.period_ns);
            let t = input.cursor_t_ns();
            let filled = out.head();

            if filled == frame_len {
                let n = filled as u64;
                match out.submit(ctx.sink(0).expect("connected").timeout()) {
                    Ok(Submitted::Published) => ctx.stats().record_out(n),
                    Ok(Submitted::Dropped) => {}
                    Err(BufferError::Timeout) => {}
                    Err(BufferError::Stopped) => break 'run,
                }
                continue;
            }

            if filled == 0 {
                // A fresh frame must start on a boundary; skip forward
                // after discontinuities or an early explicit anchor.
                let off = (t - anchor.expect("set above")) % frame_period;
                if off != 0 {
                    let skip = ((frame_period - off) / p) as usize;
                    let max_skip = input.len();
                    input.advance_tail(skip.min(max_skip));
                    continue;
                }
                out.t_ns = t;
                out.period_ns = input.period_ns;
            } else {
                // Mid-frame the stream must be contiguous; a jump closes
                // the partial frame and restarts at the next boundary.
                let expected = out.t_ns + filled as u64 * p;
                if t != expected {
                    drop(out);
                    flush_staged(ctx, 0, BatchStatus::Ok);
                    continue;
                }
            }

            let n = input.len().min(frame_len - out.head());
            let filled = out.head();
            {
                let src = input.samples::<T>();
                out.data_mut::<T>()[filled..filled + n].copy_from_slice(&src[..n]);
            }
            out.set_head(filled + n);
            input.advance_tail(n);
        }
        ctx.stats().record_in(consumed);

        if input.status.is_complete() {
            input.finish();
            complete_all(ctx);
            return;
        }
        input.finish();
    }
    complete_all(ctx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringpipe::DType;

    #[test]
    fn test_declares_aligned_regular_input() {
        let m = BatchMatcher::<f32>::new("m", BufferConfig::new("in", DType::F32)).unwrap();
        let spec = m.core().input_spec(0).unwrap();
        assert!(matches!(
            spec.constraint(Property::Regular),
            Constraint::Flag(true)
        ));
        assert!(matches!(
            spec.constraint(Property::BatchPhaseNs),
            Constraint::Aligned
        ));
    }

    #[test]
    fn test_anchor_builder() {
        let m = BatchMatcher::<f32>::new("m", BufferConfig::new("in", DType::F32))
            .unwrap()
            .with_anchor(128_000_000);
        assert_eq!(m.anchor, Some(128_000_000));
    }
}
