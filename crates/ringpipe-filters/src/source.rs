//! In-memory source: plays a vector of samples as a timed stream.

use crate::pump::{complete_all, flush_staged};
use ringpipe::{BatchStatus, BufferError, ConfigError, Sample, Submitted};
use ringpipe_graph::{
    Filter, FilterCore, FilterKind, GraphError, OutputSpec, PropValue, Property, WorkerCtx,
};

/// Source that emits a prepared vector in fixed-size batches, then a
/// final empty `Complete` batch.
///
/// For a regular stream (`period_ns > 0`) sample `i` is stamped
/// `t0_ns + i * period_ns`. An irregular stream (`period_ns == 0`)
/// carries one sample per batch and `t0_ns` is re-interpreted per
/// batch by [`with_timestamps`](Self::with_timestamps).
pub struct VecSource<T: Sample> {
    core: FilterCore,
    data: Option<Vec<T>>,
    timestamps: Option<Vec<u64>>,
    t0_ns: u64,
    period_ns: u32,
    batch_len: usize,
}

impl<T: Sample> VecSource<T> {
    /// Regular stream: `data` at `period_ns`, starting at `t0_ns`,
    /// emitted in `batch_len`-sample batches.
    pub fn new(
        name: impl Into<String>,
        data: Vec<T>,
        t0_ns: u64,
        period_ns: u32,
        batch_len: usize,
    ) -> Result<Self, GraphError> {
        if batch_len == 0 {
            return Err(ConfigError::new("batch_len", "must be at least 1").into());
        }
        if period_ns == 0 {
            return Err(ConfigError::new(
                "period_ns",
                "must be non-zero; use with_timestamps for irregular streams",
            )
            .into());
        }

        let mut core = FilterCore::new(name, FilterKind::Source);
        core.add_output(
            T::DTYPE,
            OutputSpec::new()
                .set(Property::PeriodNs, PropValue::U64(u64::from(period_ns)))
                .set(Property::Regular, PropValue::Bool(true))
                .set(
                    Property::BatchPhaseNs,
                    PropValue::U64(t0_ns % u64::from(period_ns)),
                )
                .set(Property::BatchCapacity, PropValue::Usize(batch_len)),
        );
        Ok(Self {
            core,
            data: Some(data),
            timestamps: None,
            t0_ns,
            period_ns,
            batch_len,
        })
    }

    /// Irregular stream: one sample per batch, each with its own
    /// timestamp. `data` and `timestamps` must have equal length and
    /// timestamps must be strictly increasing.
    pub fn with_timestamps(
        name: impl Into<String>,
        data: Vec<T>,
        timestamps: Vec<u64>,
    ) -> Result<Self, GraphError> {
        if data.len() != timestamps.len() {
            return Err(
                ConfigError::new("timestamps", "must match data length").into(),
            );
        }
        if timestamps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(
                ConfigError::new("timestamps", "must be strictly increasing").into(),
            );
        }

        let mut core = FilterCore::new(name, FilterKind::Source);
        core.add_output(
            T::DTYPE,
            OutputSpec::new()
                .set(Property::PeriodNs, PropValue::U64(0))
                .set(Property::Regular, PropValue::Bool(false))
                .set(Property::BatchCapacity, PropValue::Usize(1)),
        );
        Ok(Self {
            core,
            data: Some(data),
            timestamps: Some(timestamps),
            t0_ns: 0,
            period_ns: 0,
            batch_len: 1,
        })
    }
}

impl<T: Sample> Filter for VecSource<T> {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn start(&mut self) -> Result<(), GraphError> {
        self.core.require_connected(0)?;
        let data = self.data.take().ok_or(GraphError::Busy)?;
        let timestamps = self.timestamps.take();
        let (t0, period, batch_len) = (self.t0_ns, self.period_ns, self.batch_len);
        self.core.start_with(move |ctx| {
            vec_worker(&ctx, &data, timestamps.as_deref(), t0, period, batch_len);
        })
    }
}

fn vec_worker<T: Sample>(
    ctx: &WorkerCtx,
    data: &[T],
    timestamps: Option<&[u64]>,
    t0_ns: u64,
    period_ns: u32,
    batch_len: usize,
) {
    let mut idx = 0usize;
    while ctx.is_running() {
        if idx >= data.len() {
            flush_staged(ctx, 0, BatchStatus::Complete);
            return;
        }

        let mut out = ctx.stage(0);
        if out.head() == 0 {
            let n = batch_len.min(out.capacity()).min(data.len() - idx);
            out.t_ns = match timestamps {
                Some(ts) => ts[idx],
                None => t0_ns + idx as u64 * u64::from(period_ns),
            };
            out.period_ns = period_ns;
            out.data_mut::<T>()[..n].copy_from_slice(&data[idx..idx + n]);
            out.set_head(n);
        }

        let n = out.head() as u64;
        match out.submit(ctx.sink(0).expect("connected").timeout()) {
            Ok(Submitted::Published) => {
                ctx.stats().record_out(n);
                idx += n as usize;
            }
            Ok(Submitted::Dropped) => idx += n as usize,
            Err(BufferError::Timeout) => {} // retry the staged batch
            Err(BufferError::Stopped) => break,
        }
    }
    complete_all(ctx);
}
