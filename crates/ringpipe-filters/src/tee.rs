//! 1-in/N-out distribution.

use crate::check_input_dtype;
use crate::pump::{complete_all, flush_staged, push_samples};
use ringpipe::{Batch, BufferConfig, ConfigError, Sample};
use ringpipe_graph::{
    Filter, FilterCore, FilterKind, GraphError, InputSpec, OutputSpec, Property, WorkerCtx,
};
use std::marker::PhantomData;
use tracing::trace;

/// Output-selection policy for [`TeeMode::LoadBalance`].
///
/// `backlogs` holds the queued-sample count of each candidate output,
/// in port order; the returned index selects among the candidates.
pub trait BalancePolicy: Send {
    /// Picks a candidate index for the next batch.
    fn pick(&mut self, backlogs: &[u64]) -> usize;
}

/// Default balance policy: the output with the smallest queued-sample
/// backlog; ties go to the lower port.
pub struct LeastBacklog;

impl BalancePolicy for LeastBacklog {
    fn pick(&mut self, backlogs: &[u64]) -> usize {
        backlogs
            .iter()
            .enumerate()
            .min_by_key(|(_, b)| **b)
            .map_or(0, |(i, _)| i)
    }
}

/// Distribution mode of a [`Tee`].
pub enum TeeMode {
    /// Every connected output receives every batch.
    Duplicate,
    /// Batches rotate over the connected outputs.
    RoundRobin,
    /// A [`BalancePolicy`] picks the output per batch.
    LoadBalance(Box<dyn BalancePolicy>),
    /// A predicate maps each batch to an output port. Batches routed to
    /// an unconnected or out-of-range port are discarded.
    Conditional(Box<dyn Fn(&Batch) -> usize + Send>),
}

impl std::fmt::Debug for TeeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TeeMode::Duplicate => write!(f, "Duplicate"),
            TeeMode::RoundRobin => write!(f, "RoundRobin"),
            TeeMode::LoadBalance(_) => write!(f, "LoadBalance(..)"),
            TeeMode::Conditional(_) => write!(f, "Conditional(..)"),
        }
    }
}

/// 1-in/N-out distributor. Payloads are copied per output, never
/// mutated; each input batch becomes one output batch per target
/// (split into several when the target's batch capacity is smaller).
///
/// Per-output overflow policy is a property of each downstream buffer:
/// a critical path can block while a monitoring tap drops.
#[derive(Debug)]
pub struct Tee<T: Sample> {
    core: FilterCore,
    mode: Option<TeeMode>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Sample> Tee<T> {
    /// Builds a tee with `n_outputs` output ports.
    pub fn new(
        name: impl Into<String>,
        input: BufferConfig,
        n_outputs: usize,
        mode: TeeMode,
    ) -> Result<Self, GraphError> {
        check_input_dtype::<T>(&input)?;
        if n_outputs == 0 {
            return Err(ConfigError::new("n_outputs", "must be at least 1").into());
        }

        let mut core = FilterCore::new(name, FilterKind::SimoTee);
        core.add_input(input, InputSpec::new())?;
        for _ in 0..n_outputs {
            core.add_output(
                T::DTYPE,
                OutputSpec::new()
                    .preserve(Property::PeriodNs)
                    .preserve(Property::Regular)
                    .preserve(Property::BatchPhaseNs)
                    .preserve(Property::BatchCapacity),
            );
        }
        Ok(Self {
            core,
            mode: Some(mode),
            _marker: PhantomData,
        })
    }
}

impl<T: Sample> Filter for Tee<T> {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn start(&mut self) -> Result<(), GraphError> {
        let mode = self.mode.take().ok_or(GraphError::Busy)?;
        self.core.start_with(move |ctx| tee_worker::<T>(&ctx, mode))
    }
}

fn tee_worker<T: Sample>(ctx: &WorkerCtx, mut mode: TeeMode) {
    let connected: Vec<usize> = (0..ctx.n_outputs())
        .filter(|&p| ctx.sink(p).is_some())
        .collect();
    let mut rr = 0usize;
    let mut targets: Vec<usize> = Vec::with_capacity(connected.len());
    let mut backlogs: Vec<u64> = vec![0; connected.len()];

    'run: while ctx.is_running() {
        let input = match ctx.recv(0) {
            Ok(slot) => slot,
            Err(_) => continue,
        };

        if input.status.is_complete() {
            ctx.stats().record_in(input.len() as u64);
            input.finish();
            complete_all(ctx);
            return;
        }

        targets.clear();
        match &mut mode {
            TeeMode::Duplicate => targets.extend_from_slice(&connected),
            TeeMode::RoundRobin => {
                if !connected.is_empty() {
                    targets.push(connected[rr % connected.len()]);
                    rr += 1;
                }
            }
            TeeMode::LoadBalance(policy) => {
                if !connected.is_empty() {
                    for (slot, &port) in backlogs.iter_mut().zip(&connected) {
                        *slot = ctx.sink(port).expect("connected").stats().queued_samples;
                    }
                    let choice = policy.pick(&backlogs).min(connected.len() - 1);
                    targets.push(connected[choice]);
                }
            }
            TeeMode::Conditional(select) => {
                let port = select(&input);
                if ctx.sink(port).is_some() {
                    targets.push(port);
                } else {
                    trace!(filter = ctx.name(), port, "conditional route discarded");
                }
            }
        }

        let t_ns = input.cursor_t_ns();
        let len = input.len() as u64;
        for &port in &targets {
            if push_samples::<T>(
                ctx,
                port,
                input.samples::<T>(),
                t_ns,
                input.period_ns,
                input.meta.as_ref(),
            )
            .is_err()
            {
                break 'run;
            }
            // One output batch per input batch: flush, carrying a fault
            // status through unchanged.
            flush_staged(ctx, port, input.status);
        }

        ctx.stats().record_in(len);
        input.finish();
    }
    complete_all(ctx);
}
