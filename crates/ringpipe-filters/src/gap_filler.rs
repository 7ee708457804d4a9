//! Bounded gap repair by interpolation.

use crate::check_input_dtype;
use crate::float::FloatSample;
use crate::map::refine_batch_capacity_from_sink;
use crate::pump::{complete_all, flush_staged, push_samples};
use ringpipe::{BatchStatus, BufferConfig, ConfigError, ErrorKind};
use ringpipe_graph::{
    worker_error, Constraint, Filter, FilterCore, FilterKind, GraphError, InputSpec, OutputSpec,
    Property, WorkerCtx,
};
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// Batch annotation marking samples synthesized by a [`GapFiller`].
///
/// Attached as batch meta to every batch of interpolated samples; real
/// samples are never mixed into a flagged batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapFillMeta {
    /// Number of synthesized samples in the flagged batch's stream gap.
    pub filled: u64,
}

/// Repairs bounded gaps in a regular stream by linear interpolation
/// between the samples on either side, flagging synthesized batches
/// through [`GapFillMeta`]. Gaps longer than the configured bound pass
/// through unfilled.
#[derive(Debug)]
pub struct GapFiller<T: FloatSample> {
    core: FilterCore,
    max_gap: u64,
    refined: Option<usize>,
    _marker: PhantomData<fn(T)>,
}

impl<T: FloatSample> GapFiller<T> {
    /// Builds a gap filler bridging up to `max_gap` missing samples.
    pub fn new(
        name: impl Into<String>,
        input: BufferConfig,
        max_gap: u64,
    ) -> Result<Self, GraphError> {
        check_input_dtype::<T>(&input)?;
        if max_gap == 0 {
            return Err(ConfigError::new("max_gap", "must be at least 1").into());
        }

        let mut core = FilterCore::new(name, FilterKind::Map);
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
        Ok(Self {
            core,
            max_gap,
            refined: None,
            _marker: PhantomData,
        })
    }
}

impl<T: FloatSample> Filter for GapFiller<T> {
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
        let max_gap = self.max_gap;
        self.core
            .start_with(move |ctx| gap_worker::<T>(&ctx, max_gap))
    }
}

fn gap_worker<T: FloatSample>(ctx: &WorkerCtx, max_gap: u64) {
    let mut last: Option<(u64, f64)> = None;
    let mut scratch: Vec<T> = Vec::new();

    while ctx.is_running() {
        let input = match ctx.recv(0) {
            Ok(slot) => slot,
            Err(_) => continue,
        };
        let p = u64::from(input.period_ns);
        let len = input.len();

        if len > 0 {
            if p == 0 {
                ctx.fail(worker_error!(
                    ErrorKind::TypeConstraintViolation,
                    "gap filler requires a regular stream"
                ));
                input.finish();
                complete_all(ctx);
                return;
            }
            let t = input.cursor_t_ns();

            if let Some((lt, lx)) = last {
                let expected = lt + p;
                if t < expected || (t - lt) % p != 0 {
                    ctx.fail(worker_error!(
                        ErrorKind::TypeConstraintViolation,
                        "timestamp {t} breaks the sample grid (last {lt}, period {p})"
                    ));
                    input.finish();
                    complete_all(ctx);
                    return;
                }
                let missing = (t - lt) / p - 1;
                if missing > 0 {
                    // Close the current output batch either way so real
                    // and synthetic samples never share one.
                    flush_staged(ctx, 0, BatchStatus::Ok);
                    if missing <= max_gap {
                        let x0 = input.samples::<T>()[0].to_f64();
                        scratch.clear();
                        for k in 1..=missing {
                            let u = (k * p) as f64 / (t - lt) as f64;
                            scratch.push(T::from_f64(lx + u * (x0 - lx)));
                        }
                        let meta: Arc<dyn Any + Send + Sync> =
                            Arc::new(GapFillMeta { filled: missing });
                        if push_samples::<T>(ctx, 0, &scratch, lt + p, p as u32, Some(&meta))
                            .is_err()
                        {
                            break;
                        }
                        flush_staged(ctx, 0, BatchStatus::Ok);
                    } else {
                        warn!(
                            filter = ctx.name(),
                            missing, max_gap, "gap exceeds bound, passing through unfilled"
                        );
                    }
                }
            }

            let ok = push_samples::<T>(ctx, 0, input.samples::<T>(), t, p as u32, None).is_ok();
            ctx.stats().record_in(len as u64);
            let last_x = input.samples::<T>()[len - 1].to_f64();
            last = Some((t + (len as u64 - 1) * p, last_x));
            if !ok {
                break;
            }
        }

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
    fn test_rejects_zero_bound() {
        let err =
            GapFiller::<f32>::new("g", BufferConfig::new("in", DType::F32), 0).unwrap_err();
        assert!(matches!(err, GraphError::InvalidConfig(_)));
    }

    #[test]
    fn test_meta_is_downcastable() {
        let meta: Arc<dyn Any + Send + Sync> = Arc::new(GapFillMeta { filled: 3 });
        let got = meta.downcast_ref::<GapFillMeta>().unwrap();
        assert_eq!(got.filled, 3);
    }
}
