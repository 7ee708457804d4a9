//! Counter-driven source: samples computed from a sample index.

use crate::float::FloatSample;
use crate::pump::complete_all;
use crate::pump::flush_staged;
use ringpipe::{BatchStatus, BufferError, ConfigError, Sample, Submitted};
use ringpipe_graph::{
    Filter, FilterCore, FilterKind, GraphError, OutputSpec, PropValue, Property, WorkerCtx,
};
use std::time::{Duration, Instant};

/// Configuration for [`FunctionGenerator`].
#[derive(Debug, Clone)]
pub struct FuncGenConfig {
    /// Samples per second. Must be finite, positive, and at most 1 GHz
    /// (one sample per nanosecond).
    pub sample_rate: f64,
    /// Total samples to emit before completing; `None` runs until stop.
    pub n_samples: Option<u64>,
    /// Pace emission to the wall clock instead of free-running.
    pub realtime: bool,
}

impl Default for FuncGenConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1_000.0,
            n_samples: None,
            realtime: false,
        }
    }
}

/// Source filter emitting `f(sample_index)` at a fixed rate.
///
/// Timing: `t_ns = round(n * 1e9 / sample_rate)` for sample `n`,
/// `period_ns = round(1e9 / sample_rate)`; the stream is regular with
/// zero phase. Batch sizes follow the connected sink's batch capacity.
pub struct FunctionGenerator<T: Sample> {
    core: FilterCore,
    config: FuncGenConfig,
    f: Option<Box<dyn FnMut(u64) -> T + Send>>,
    refined: Option<usize>,
}

impl<T: Sample> FunctionGenerator<T> {
    /// Builds a generator from an arbitrary sample function.
    pub fn new(
        name: impl Into<String>,
        config: FuncGenConfig,
        f: impl FnMut(u64) -> T + Send + 'static,
    ) -> Result<Self, GraphError> {
        if !config.sample_rate.is_finite() || config.sample_rate <= 0.0 {
            return Err(ConfigError::new("sample_rate", "must be finite and positive").into());
        }
        if config.sample_rate > 1e9 {
            return Err(ConfigError::new("sample_rate", "must be at most 1e9 Hz").into());
        }

        let period_ns = period_ns_of(config.sample_rate);
        let mut core = FilterCore::new(name, FilterKind::Source);
        core.add_output(
            T::DTYPE,
            OutputSpec::new()
                .set(Property::PeriodNs, PropValue::U64(u64::from(period_ns)))
                .set(Property::Regular, PropValue::Bool(true))
                .set(Property::BatchPhaseNs, PropValue::U64(0)),
        );
        Ok(Self {
            core,
            config,
            f: Some(Box::new(f)),
            refined: None,
        })
    }

    /// Constant-valued generator.
    pub fn constant(
        name: impl Into<String>,
        config: FuncGenConfig,
        value: T,
    ) -> Result<Self, GraphError> {
        Self::new(name, config, move |_| value)
    }
}

impl<T: FloatSample> FunctionGenerator<T> {
    /// Sine wave of `freq_hz` with the given amplitude.
    pub fn sine(
        name: impl Into<String>,
        config: FuncGenConfig,
        amplitude: f64,
        freq_hz: f64,
    ) -> Result<Self, GraphError> {
        let rate = config.sample_rate;
        Self::new(name, config, move |n| {
            let phase = 2.0 * std::f64::consts::PI * freq_hz * (n as f64) / rate;
            T::from_f64(amplitude * phase.sin())
        })
    }

    /// Square wave of `freq_hz` with the given amplitude.
    pub fn square(
        name: impl Into<String>,
        config: FuncGenConfig,
        amplitude: f64,
        freq_hz: f64,
    ) -> Result<Self, GraphError> {
        let rate = config.sample_rate;
        Self::new(name, config, move |n| {
            let cycle = freq_hz * (n as f64) / rate;
            let v = if cycle.fract() < 0.5 { amplitude } else { -amplitude };
            T::from_f64(v)
        })
    }

    /// Rising sawtooth of `freq_hz` spanning `-amplitude..amplitude`.
    pub fn ramp(
        name: impl Into<String>,
        config: FuncGenConfig,
        amplitude: f64,
        freq_hz: f64,
    ) -> Result<Self, GraphError> {
        let rate = config.sample_rate;
        Self::new(name, config, move |n| {
            let cycle = (freq_hz * (n as f64) / rate).fract();
            T::from_f64(amplitude * (2.0 * cycle - 1.0))
        })
    }
}

fn period_ns_of(rate: f64) -> u32 {
    (1e9 / rate).round().max(1.0) as u32
}

fn t_of(n: u64, rate: f64) -> u64 {
    ((n as f64) * 1e9 / rate).round() as u64
}

impl<T: Sample> Filter for FunctionGenerator<T> {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn refine_outputs(&mut self) -> bool {
        crate::map::refine_batch_capacity_from_sink(&mut self.core, &mut self.refined)
    }

    fn start(&mut self) -> Result<(), GraphError> {
        self.core.require_connected(0)?;
        let f = self.f.take().ok_or(GraphError::Busy)?;
        let config = self.config.clone();
        self.core
            .start_with(move |ctx| gen_worker(&ctx, &config, f))
    }
}

fn gen_worker<T: Sample>(ctx: &WorkerCtx, config: &FuncGenConfig, mut f: impl FnMut(u64) -> T) {
    let rate = config.sample_rate;
    let period_ns = period_ns_of(rate);
    let started = Instant::now();
    let mut n: u64 = 0; // next sample index to generate

    'run: while ctx.is_running() {
        if config.n_samples.is_some_and(|limit| n >= limit) {
            // Final partial batch (possibly empty) carries the terminator.
            flush_staged(ctx, 0, BatchStatus::Complete);
            return;
        }

        let full = {
            let mut out = ctx.stage(0);
            let cap = out.capacity();
            let filled = out.head();
            if filled == 0 {
                out.t_ns = t_of(n, rate);
                out.period_ns = period_ns;
            }
            let mut k = cap - filled;
            if let Some(limit) = config.n_samples {
                k = k.min((limit - n) as usize);
            }
            for i in 0..k {
                out.data_mut::<T>()[filled + i] = f(n + i as u64);
            }
            out.set_head(filled + k);
            n += k as u64;

            if out.head() == cap {
                let count = cap as u64;
                match out.submit(ctx.sink(0).expect("connected").timeout()) {
                    Ok(Submitted::Published) => ctx.stats().record_out(count),
                    Ok(Submitted::Dropped) => {}
                    Err(BufferError::Timeout) => continue 'run, // retry staged batch
                    Err(BufferError::Stopped) => break 'run,
                }
                true
            } else {
                false
            }
        };

        if full && config.realtime {
            // Sleep until the wall clock catches up with the timestamp of
            // the next sample to be generated.
            let target = Duration::from_nanos(t_of(n, rate));
            let elapsed = started.elapsed();
            if target > elapsed {
                std::thread::sleep(target - elapsed);
            }
        }
    }
    complete_all(ctx);
}
