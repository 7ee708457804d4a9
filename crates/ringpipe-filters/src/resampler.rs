//! Rate conversion with selectable interpolation quality.

use crate::check_input_dtype;
use crate::float::FloatSample;
use crate::map::refine_batch_capacity_from_sink;
use crate::pump::{complete_all, push_samples};
use ringpipe::{BufferConfig, ConfigError, ErrorKind};
use ringpipe_graph::{
    worker_error, Constraint, Filter, FilterCore, FilterKind, GraphError, InputSpec, OutputSpec,
    PropValue, Property, WorkerCtx,
};
use std::collections::VecDeque;
use std::marker::PhantomData;

/// Interpolation quality of a [`Resampler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// Nearest-previous sample (cheapest, steppy).
    Hold,
    /// Linear interpolation between neighbours.
    Linear,
    /// Catmull-Rom cubic over a four-sample window.
    Cubic,
}

/// Converts a regular stream to a different fixed rate.
///
/// The output grid anchors at the first input timestamp and advances at
/// the configured rate; values come from a sliding window interpolated
/// per [`Quality`]. Cubic quality delays emission by one input sample
/// to have a lookahead neighbour.
pub struct Resampler<T: FloatSample> {
    core: FilterCore,
    out_rate: f64,
    quality: Quality,
    refined: Option<usize>,
    _marker: PhantomData<fn(T)>,
}

impl<T: FloatSample> Resampler<T> {
    /// Builds a resampler emitting at `out_rate` samples per second.
    pub fn new(
        name: impl Into<String>,
        input: BufferConfig,
        out_rate: f64,
        quality: Quality,
    ) -> Result<Self, GraphError> {
        check_input_dtype::<T>(&input)?;
        if !out_rate.is_finite() || out_rate <= 0.0 || out_rate > 1e9 {
            return Err(
                ConfigError::new("out_rate", "must be finite, positive, at most 1e9").into(),
            );
        }

        let period_ns = (1e9 / out_rate).round().max(1.0) as u64;
        let mut core = FilterCore::new(name, FilterKind::Map);
        core.add_input(
            input,
            InputSpec::new().constrain(Property::Regular, Constraint::Flag(true)),
        )?;
        core.add_output(
            T::DTYPE,
            OutputSpec::new()
                .set(Property::PeriodNs, PropValue::U64(period_ns))
                .set(Property::Regular, PropValue::Bool(true)),
        );
        Ok(Self {
            core,
            out_rate,
            quality,
            refined: None,
            _marker: PhantomData,
        })
    }
}

impl<T: FloatSample> Filter for Resampler<T> {
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
        let p_out = (1e9 / self.out_rate).round().max(1.0) as u64;
        let quality = self.quality;
        self.core
            .start_with(move |ctx| resampler_worker::<T>(&ctx, p_out, quality))
    }
}

fn interpolate(quality: Quality, a: f64, b: f64, c: f64, d: f64, u: f64) -> f64 {
    match quality {
        Quality::Hold => b,
        Quality::Linear => b + u * (c - b),
        Quality::Cubic => {
            // Catmull-Rom over (a, b, c, d), u in [0, 1) between b and c.
            0.5 * (2.0 * b
                + (c - a) * u
                + (2.0 * a - 5.0 * b + 4.0 * c - d) * u * u
                + (3.0 * (b - c) + d - a) * u * u * u)
        }
    }
}

fn resampler_worker<T: FloatSample>(ctx: &WorkerCtx, p_out: u64, quality: Quality) {
    // Sliding window of the most recent input samples (time, value).
    let mut window: VecDeque<(u64, f64)> = VecDeque::with_capacity(4);
    let mut next_t: Option<u64> = None;
    let mut scratch: Vec<T> = Vec::new();

    'run: while ctx.is_running() {
        let input = match ctx.recv(0) {
            Ok(slot) => slot,
            Err(_) => continue,
        };
        let p_in = u64::from(input.period_ns);
        let len = input.len();

        if len > 0 && p_in == 0 {
            ctx.fail(worker_error!(
                ErrorKind::TypeConstraintViolation,
                "resampler requires a regular stream"
            ));
            input.finish();
            complete_all(ctx);
            return;
        }

        if len > 0 {
            let t0 = input.cursor_t_ns();
            scratch.clear();
            let run_start = *next_t.get_or_insert(t0);
            let mut t_emit = run_start;

            for (i, &x) in input.samples::<T>().iter().enumerate() {
                let t = t0 + i as u64 * p_in;
                window.push_back((t, x.to_f64()));
                if window.len() > 4 {
                    window.pop_front();
                }
                let n = window.len();

                // Bracket: the newest pair for hold/linear, one sample
                // behind for cubic (lookahead neighbour).
                let bracket = match quality {
                    Quality::Hold | Quality::Linear if n >= 2 => Some((n - 2, n - 1)),
                    Quality::Cubic if n >= 3 => Some((n - 3, n - 2)),
                    _ => None,
                };
                let Some((i0, i1)) = bracket else { continue };
                let (b_t, b_x) = window[i0];
                let (c_t, c_x) = window[i1];
                let a_x = if i0 > 0 { window[i0 - 1].1 } else { b_x };
                let d_x = if i1 + 1 < n { window[i1 + 1].1 } else { c_x };

                while t_emit >= b_t && t_emit < c_t {
                    let u = (t_emit - b_t) as f64 / (c_t - b_t) as f64;
                    scratch.push(T::from_f64(interpolate(quality, a_x, b_x, c_x, d_x, u)));
                    t_emit += p_out;
                }
            }
            next_t = Some(t_emit);

            ctx.stats().record_in(len as u64);
            if !scratch.is_empty()
                && push_samples::<T>(ctx, 0, &scratch, run_start, p_out as u32, None).is_err()
            {
                break 'run;
            }
        }

        if input.status.is_complete() {
            // Drain the tail bracket(s) the lookahead held back, closing
            // the window at the final input sample.
            scratch.clear();
            let run_start = next_t.unwrap_or(0);
            let mut t_emit = run_start;
            if window.len() >= 2 {
                let n = window.len();
                let (b_t, b_x) = window[n - 2];
                let (c_t, c_x) = window[n - 1];
                let a_x = if n >= 3 { window[n - 3].1 } else { b_x };
                while t_emit <= c_t {
                    if t_emit < b_t {
                        t_emit += p_out;
                        continue;
                    }
                    let u = (t_emit - b_t) as f64 / (c_t - b_t) as f64;
                    let q = if quality == Quality::Hold {
                        Quality::Hold
                    } else {
                        Quality::Linear
                    };
                    scratch.push(T::from_f64(interpolate(q, a_x, b_x, c_x, c_x, u.min(1.0))));
                    t_emit += p_out;
                }
            } else if window.len() == 1 && Some(window[0].0) == next_t {
                scratch.push(T::from_f64(window[0].1));
            }
            if !scratch.is_empty() {
                let _ = push_samples::<T>(ctx, 0, &scratch, run_start, p_out as u32, None);
            }
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
    fn test_interpolation_kernels() {
        // Hold keeps the left neighbour.
        assert_eq!(interpolate(Quality::Hold, 0.0, 2.0, 4.0, 6.0, 0.75), 2.0);
        // Linear midpoint.
        assert_eq!(interpolate(Quality::Linear, 0.0, 2.0, 4.0, 6.0, 0.5), 3.0);
        // Cubic reproduces the knots.
        assert_eq!(interpolate(Quality::Cubic, 0.0, 2.0, 4.0, 6.0, 0.0), 2.0);
        // A straight line stays straight under Catmull-Rom.
        assert_eq!(interpolate(Quality::Cubic, 0.0, 2.0, 4.0, 6.0, 0.5), 3.0);
    }

    #[test]
    fn test_rejects_bad_rate() {
        for rate in [0.0, -5.0, f64::INFINITY, 2e9] {
            assert!(Resampler::<f32>::new(
                "r",
                BufferConfig::new("in", DType::F32),
                rate,
                Quality::Linear,
            )
            .is_err());
        }
    }

    #[test]
    fn test_declares_output_rate() {
        let r = Resampler::<f64>::new(
            "r",
            BufferConfig::new("in", DType::F64),
            500_000.0,
            Quality::Cubic,
        )
        .unwrap();
        assert!(matches!(
            r.core().output_spec(0).unwrap().behavior(Property::PeriodNs),
            ringpipe_graph::Behavior::Set(PropValue::U64(2_000))
        ));
    }
}
