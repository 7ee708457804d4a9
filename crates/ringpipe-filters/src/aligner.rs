//! Phase correction onto the sample grid.

use crate::check_input_dtype;
use crate::float::FloatSample;
use crate::map::refine_batch_capacity_from_sink;
use crate::pump::{complete_all, push_samples};
use ringpipe::{BufferConfig, ErrorKind};
use ringpipe_graph::{
    worker_error, Constraint, Filter, FilterCore, FilterKind, GraphError, InputSpec, OutputSpec,
    PropValue, Property, WorkerCtx,
};
use std::marker::PhantomData;

/// Corrects a non-zero stream phase (`t_ns % period_ns != 0`) by
/// linearly interpolating samples onto grid-aligned timestamps. The
/// sample rate is preserved exactly; an already-aligned stream passes
/// through unchanged.
pub struct SampleAligner<T: FloatSample> {
    core: FilterCore,
    refined: Option<usize>,
    _marker: PhantomData<fn(T)>,
}

impl<T: FloatSample> SampleAligner<T> {
    /// Builds an aligner owning one input buffer.
    pub fn new(name: impl Into<String>, input: BufferConfig) -> Result<Self, GraphError> {
        check_input_dtype::<T>(&input)?;
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
                .set(Property::BatchPhaseNs, PropValue::U64(0)),
        );
        Ok(Self {
            core,
            refined: None,
            _marker: PhantomData,
        })
    }
}

impl<T: FloatSample> Filter for SampleAligner<T> {
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
        self.core.start_with(|ctx| aligner_worker::<T>(&ctx))
    }
}

fn aligner_worker<T: FloatSample>(ctx: &WorkerCtx) {
    // Interpolation state across batches.
    let mut prev: Option<(u64, f64)> = None;
    let mut next_grid: Option<u64> = None;
    let mut scratch: Vec<T> = Vec::new();

    while ctx.is_running() {
        let input = match ctx.recv(0) {
            Ok(slot) => slot,
            Err(_) => continue,
        };
        let p = u64::from(input.period_ns);
        let len = input.len();

        if len > 0 && p == 0 {
            ctx.fail(worker_error!(
                ErrorKind::TypeConstraintViolation,
                "aligner requires a regular stream"
            ));
            input.finish();
            complete_all(ctx);
            return;
        }

        if len > 0 {
            let t0 = input.cursor_t_ns();
            if t0 % p == 0 && prev.is_none() {
                // Already on the grid and no partial interpolation state:
                // pass through untouched.
                let ok = push_samples::<T>(
                    ctx,
                    0,
                    input.samples::<T>(),
                    t0,
                    input.period_ns,
                    None,
                )
                .is_ok();
                ctx.stats().record_in(len as u64);
                let status = input.status;
                input.finish();
                if !ok {
                    break;
                }
                if status.is_complete() {
                    complete_all(ctx);
                    return;
                }
                continue;
            }

            // Interpolating path: emit one sample per grid time
            // g = k * period, between the surrounding input samples.
            scratch.clear();
            let mut g = *next_grid.get_or_insert_with(|| t0.div_ceil(p) * p);
            let first_g = g;
            for (i, &x) in input.samples::<T>().iter().enumerate() {
                let t = t0 + i as u64 * p;
                let x = x.to_f64();
                if let Some((pt, px)) = prev {
                    // pt < g <= t within a regular stream.
                    while g <= t {
                        let u = (g - pt) as f64 / (t - pt) as f64;
                        scratch.push(T::from_f64(px + u * (x - px)));
                        g += p;
                    }
                } else if g == t {
                    // First sample happens to sit on the grid.
                    scratch.push(T::from_f64(x));
                    g += p;
                }
                prev = Some((t, x));
            }
            next_grid = Some(g);

            ctx.stats().record_in(len as u64);
            if !scratch.is_empty()
                && push_samples::<T>(ctx, 0, &scratch, first_g, input.period_ns, None).is_err()
            {
                break;
            }
        } else {
            ctx.stats().record_in(0);
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
    fn test_requires_regular_input() {
        let a = SampleAligner::<f64>::new("a", BufferConfig::new("in", DType::F64)).unwrap();
        assert!(matches!(
            a.core().input_spec(0).unwrap().constraint(Property::Regular),
            Constraint::Flag(true)
        ));
    }

    #[test]
    fn test_declares_zero_phase_output() {
        let a = SampleAligner::<f32>::new("a", BufferConfig::new("in", DType::F32)).unwrap();
        let spec = a.core().output_spec(0).unwrap();
        assert!(matches!(
            spec.behavior(Property::BatchPhaseNs),
            ringpipe_graph::Behavior::Set(PropValue::U64(0))
        ));
    }
}
