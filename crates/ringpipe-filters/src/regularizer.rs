//! Irregular events to a fixed-rate stream.

use crate::check_input_dtype;
use crate::float::FloatSample;
use crate::pump::complete_all;
use ringpipe::{BufferConfig, BufferError, ConfigError, ErrorKind, Submitted};
use ringpipe_graph::{
    worker_error, Constraint, Filter, FilterCore, FilterKind, GraphError, InputSpec, OutputSpec,
    PropValue, Property, WorkerCtx,
};
use std::marker::PhantomData;

/// How grid values are derived from surrounding events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegularizeMode {
    /// Last event value holds until the next event.
    Hold,
    /// Linear interpolation between surrounding events.
    Linear,
}

/// Converts an irregular event stream (`period_ns == 0`, one sample per
/// batch) into a regular stream at a fixed rate.
///
/// Emits one sample per output batch so downstream stages choose their
/// own batching (a [`BatchMatcher`](crate::BatchMatcher) typically
/// follows). Grid timestamps are `k * period` from the first event
/// onward, so the output is zero-phase.
pub struct Regularizer<T: FloatSample> {
    core: FilterCore,
    rate: f64,
    mode: RegularizeMode,
    _marker: PhantomData<fn(T)>,
}

impl<T: FloatSample> Regularizer<T> {
    /// Builds a regularizer emitting at `rate` samples per second.
    pub fn new(
        name: impl Into<String>,
        input: BufferConfig,
        rate: f64,
        mode: RegularizeMode,
    ) -> Result<Self, GraphError> {
        check_input_dtype::<T>(&input)?;
        if !rate.is_finite() || rate <= 0.0 || rate > 1e9 {
            return Err(ConfigError::new("rate", "must be finite, positive, at most 1e9").into());
        }

        let period_ns = (1e9 / rate).round().max(1.0) as u32;
        let mut core = FilterCore::new(name, FilterKind::Map);
        core.add_input(
            input,
            InputSpec::new().constrain(Property::Regular, Constraint::Flag(false)),
        )?;
        core.add_output(
            T::DTYPE,
            OutputSpec::new()
                .set(Property::PeriodNs, PropValue::U64(u64::from(period_ns)))
                .set(Property::Regular, PropValue::Bool(true))
                .set(Property::BatchPhaseNs, PropValue::U64(0))
                .set(Property::BatchCapacity, PropValue::Usize(1)),
        );
        Ok(Self {
            core,
            rate,
            mode,
            _marker: PhantomData,
        })
    }
}

impl<T: FloatSample> Filter for Regularizer<T> {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn start(&mut self) -> Result<(), GraphError> {
        self.core.require_connected(0)?;
        let period = (1e9 / self.rate).round().max(1.0) as u32;
        let mode = self.mode;
        self.core
            .start_with(move |ctx| regularizer_worker::<T>(&ctx, period, mode))
    }
}

/// Publishes a single-sample batch, retrying through backpressure.
fn emit_one<T: FloatSample>(ctx: &WorkerCtx, value: T, t_ns: u64, period_ns: u32) -> bool {
    loop {
        if !ctx.is_running() {
            return false;
        }
        let mut out = ctx.stage(0);
        if out.head() == 0 {
            out.t_ns = t_ns;
            out.period_ns = period_ns;
            out.data_mut::<T>()[0] = value;
            out.set_head(1);
        }
        match out.submit(ctx.sink(0).expect("connected").timeout()) {
            Ok(Submitted::Published) => {
                ctx.stats().record_out(1);
                return true;
            }
            Ok(Submitted::Dropped) => return true,
            Err(BufferError::Timeout) => {} // backpressure: retry
            Err(BufferError::Stopped) => return false,
        }
    }
}

fn regularizer_worker<T: FloatSample>(ctx: &WorkerCtx, period_ns: u32, mode: RegularizeMode) {
    let p = u64::from(period_ns);
    let mut prev: Option<(u64, f64)> = None;
    let mut next_g: Option<u64> = None;

    'run: while ctx.is_running() {
        let input = match ctx.recv(0) {
            Ok(slot) => slot,
            Err(_) => continue,
        };

        if input.len() > 0 {
            if input.period_ns != 0 || input.len() != 1 {
                ctx.fail(worker_error!(
                    ErrorKind::TypeConstraintViolation,
                    "regularizer expects irregular input with one sample per batch"
                ));
                input.finish();
                complete_all(ctx);
                return;
            }
            let t = input.t_ns;
            let x = input.samples::<T>()[0].to_f64();
            ctx.stats().record_in(1);

            let mut g = *next_g.get_or_insert_with(|| t.div_ceil(p) * p);
            while g <= t {
                let v = match (mode, prev) {
                    (_, None) => {
                        // Before the first event only its own grid point
                        // (if any) is defined.
                        if g == t {
                            x
                        } else {
                            g += p;
                            continue;
                        }
                    }
                    (RegularizeMode::Hold, Some((_, px))) => {
                        if g == t {
                            x
                        } else {
                            px
                        }
                    }
                    (RegularizeMode::Linear, Some((pt, px))) => {
                        let u = (g - pt) as f64 / (t - pt) as f64;
                        px + u * (x - px)
                    }
                };
                if !emit_one(ctx, T::from_f64(v), g, period_ns) {
                    break 'run;
                }
                g += p;
            }
            next_g = Some(g);
            prev = Some((t, x));
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
    fn test_rejects_bad_rate() {
        for rate in [0.0, -1.0, f64::NAN, 2e9] {
            assert!(Regularizer::<f64>::new(
                "r",
                BufferConfig::new("in", DType::F64),
                rate,
                RegularizeMode::Hold,
            )
            .is_err());
        }
    }

    #[test]
    fn test_declares_fixed_rate_output() {
        let r = Regularizer::<f32>::new(
            "r",
            BufferConfig::new("in", DType::F32),
            1_000_000.0,
            RegularizeMode::Linear,
        )
        .unwrap();
        let spec = r.core().output_spec(0).unwrap();
        assert!(matches!(
            spec.behavior(Property::PeriodNs),
            ringpipe_graph::Behavior::Set(PropValue::U64(1_000))
        ));
        assert!(matches!(
            spec.behavior(Property::BatchCapacity),
            ringpipe_graph::Behavior::Set(PropValue::Usize(1))
        ));
    }
}
