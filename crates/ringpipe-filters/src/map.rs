//! Element-wise 1-in/1-out transforms.

use crate::check_input_dtype;
use crate::pump::complete_all;
use ringpipe::{BatchStatus, BufferConfig, BufferError, Sample, Submitted};
use ringpipe_graph::{
    Filter, FilterCore, FilterKind, GraphError, InputSpec, OutputSpec, PropValue, Property,
    WorkerCtx,
};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

/// Element-wise transform: applies `f` to every sample.
///
/// Processing chunks are sized by the OUTPUT buffer's batch capacity,
/// not the input's: a `Map` accumulates small input batches into larger
/// output batches and splits large ones, conserving the sample count.
/// `period_ns` is preserved; each output batch's `t_ns` is the input
/// timestamp of its first sample.
///
/// The input/output element types are fixed by the closure; widening or
/// narrowing maps are just `Map<u16, f64>` etc., and the output's
/// declared type is checked against the sink at connect time.
pub struct Map<I: Sample, O: Sample> {
    core: FilterCore,
    f: Option<Box<dyn FnMut(I) -> O + Send>>,
    refined: Option<usize>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I: Sample, O: Sample> std::fmt::Debug for Map<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("core", &self.core)
            .field("refined", &self.refined)
            .finish_non_exhaustive()
    }
}

impl<I: Sample, O: Sample> Map<I, O> {
    /// Builds a map filter owning one input buffer described by `input`.
    pub fn new(
        name: impl Into<String>,
        input: BufferConfig,
        f: impl FnMut(I) -> O + Send + 'static,
    ) -> Result<Self, GraphError> {
        check_input_dtype::<I>(&input)?;
        let mut core = FilterCore::new(name, FilterKind::Map);
        core.add_input(input, InputSpec::new())?;
        core.add_output(
            O::DTYPE,
            OutputSpec::new()
                .preserve(Property::PeriodNs)
                .preserve(Property::Regular)
                .preserve(Property::BatchPhaseNs),
        );
        Ok(Self {
            core,
            f: Some(Box::new(f)),
            refined: None,
            _marker: PhantomData,
        })
    }
}

impl<I: Sample, O: Sample> Filter for Map<I, O> {
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
        let f = self.f.take().ok_or(GraphError::Busy)?;
        self.core.start_with(move |ctx| map_worker(&ctx, f))
    }
}

/// As [`Map`], with persistent state threaded through the closure and
/// rewound by `reset`.
pub struct StatefulMap<I: Sample, O: Sample, S: Clone + Send + 'static> {
    core: FilterCore,
    state: Arc<Mutex<S>>,
    initial: S,
    f: Option<Box<dyn FnMut(&mut S, I) -> O + Send>>,
    refined: Option<usize>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I: Sample, O: Sample, S: Clone + Send + 'static> StatefulMap<I, O, S> {
    /// Builds a stateful map starting from `initial` state.
    pub fn new(
        name: impl Into<String>,
        input: BufferConfig,
        initial: S,
        f: impl FnMut(&mut S, I) -> O + Send + 'static,
    ) -> Result<Self, GraphError> {
        check_input_dtype::<I>(&input)?;
        let mut core = FilterCore::new(name, FilterKind::Map);
        core.add_input(input, InputSpec::new())?;
        core.add_output(
            O::DTYPE,
            OutputSpec::new()
                .preserve(Property::PeriodNs)
                .preserve(Property::Regular)
                .preserve(Property::BatchPhaseNs),
        );
        Ok(Self {
            core,
            state: Arc::new(Mutex::new(initial.clone())),
            initial,
            f: Some(Box::new(f)),
            refined: None,
            _marker: PhantomData,
        })
    }

    /// Copy of the current state.
    pub fn state(&self) -> S {
        self.state.lock().unwrap().clone()
    }
}

impl<I: Sample, O: Sample, S: Clone + Send + 'static> Filter for StatefulMap<I, O, S> {
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
        let mut f = self.f.take().ok_or(GraphError::Busy)?;
        let state = Arc::clone(&self.state);
        // Uncontended: reset is forbidden while running, so the worker is
        // the only lock holder.
        let g = move |x: I| f(&mut state.lock().unwrap(), x);
        self.core.start_with(move |ctx| map_worker(&ctx, g))
    }

    fn reset(&mut self) -> Result<(), GraphError> {
        self.core.reset_runtime()?;
        *self.state.lock().unwrap() = self.initial.clone();
        Ok(())
    }
}

/// Declares the output batch capacity once the sink is known.
pub(crate) fn refine_batch_capacity_from_sink(
    core: &mut FilterCore,
    refined: &mut Option<usize>,
) -> bool {
    let Some(cap) = core.sink(0).map(|s| s.batch_capacity()) else {
        return false;
    };
    if *refined == Some(cap) {
        return false;
    }
    if let Some(spec) = core.output_spec_mut(0) {
        *spec = spec.set(Property::BatchCapacity, PropValue::Usize(cap));
    }
    *refined = Some(cap);
    true
}

fn map_worker<I: Sample, O: Sample>(ctx: &WorkerCtx, mut f: impl FnMut(I) -> O) {
    'run: while ctx.is_running() {
        let mut input = match ctx.recv(0) {
            Ok(slot) => slot,
            Err(_) => continue, // Timeout/Stopped: re-check running
        };
        let consumed = input.len() as u64;

        while input.len() > 0 {
            if !ctx.is_running() {
                break 'run;
            }
            let mut out = ctx.stage(0);
            let cap = out.capacity();
            let filled = out.head();

            if filled == cap {
                let n = filled as u64;
                match out.submit(ctx.sink(0).expect("connected").timeout()) {
                    Ok(Submitted::Published) => ctx.stats().record_out(n),
                    Ok(Submitted::Dropped) => {}
                    Err(BufferError::Timeout) => {} // backpressure
                    Err(BufferError::Stopped) => break 'run,
                }
                continue;
            }

            if filled == 0 {
                out.t_ns = input.cursor_t_ns();
                out.period_ns = input.period_ns;
            }
            let n = input.len().min(cap - filled);
            {
                let src = input.samples::<I>();
                let dst = &mut out.data_mut::<O>()[filled..filled + n];
                for (d, &s) in dst.iter_mut().zip(&src[..n]) {
                    *d = f(s);
                }
            }
            out.set_head(filled + n);
            input.advance_tail(n);
        }
        ctx.stats().record_in(consumed);

        match input.status {
            BatchStatus::Complete => {
                input.finish();
                complete_all(ctx);
                return;
            }
            BatchStatus::Fault(_) => {
                // Forward the fault marker in stream order.
                let status = input.status;
                input.finish();
                crate::pump::flush_staged(ctx, 0, status);
            }
            BatchStatus::Ok => input.finish(),
        }
    }
    complete_all(ctx);
}
