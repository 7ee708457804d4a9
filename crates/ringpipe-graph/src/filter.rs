//! Filter runtime: lifecycle, worker ownership and the management
//! surface every filter exposes.

use crate::error::{GraphError, WorkerError};
use crate::properties::{InputSpec, OutputSpec};
use crate::worker::{FilterStats, SharedStats, WorkerCtx};
use ringpipe::{BatchBuffer, BufferConfig, DType, ErrorKind};
use std::any::Any;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Coarse filter classification, used by tooling and `describe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// 0 inputs, ≥1 output.
    Source,
    /// 1 input, 1 output, element-wise.
    Map,
    /// 1 input, N outputs.
    SimoTee,
    /// N inputs with temporal coupling.
    MultiInSync,
    /// ≥1 input, 0 outputs.
    Sink,
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilterKind::Source => "source",
            FilterKind::Map => "map",
            FilterKind::SimoTee => "tee",
            FilterKind::MultiInSync => "multi-in-sync",
            FilterKind::Sink => "sink",
        };
        f.write_str(s)
    }
}

/// Health report from the management interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Running, no faults, no drops.
    Ok,
    /// Running but shedding load (overflow drops observed).
    Degraded,
    /// Worker recorded a fault.
    Failed,
    /// Not running.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifeState {
    Idle,
    Running,
    Stopped,
}

struct OutputPort {
    dtype: DType,
    spec: OutputSpec,
    sink: Option<Arc<BatchBuffer>>,
}

/// Shared runtime state of every filter: name, ports, worker handle,
/// fault slot and counters. Archetypes embed a `FilterCore` and drive it
/// through [`Filter`].
///
/// Ownership: each input buffer is owned here (by the consuming filter);
/// `sink` entries are non-owning references into downstream cores.
pub struct FilterCore {
    name: Arc<str>,
    kind: FilterKind,
    state: LifeState,
    inputs: Vec<Arc<BatchBuffer>>,
    input_specs: Vec<InputSpec>,
    outputs: Vec<OutputPort>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    worker_err: Arc<Mutex<Option<WorkerError>>>,
    stats: Arc<SharedStats>,
}

impl std::fmt::Debug for FilterCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterCore")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl FilterCore {
    /// Creates an empty core; ports are added before wiring.
    pub fn new(name: impl Into<String>, kind: FilterKind) -> Self {
        Self {
            name: Arc::from(name.into()),
            kind,
            state: LifeState::Idle,
            inputs: Vec::new(),
            input_specs: Vec::new(),
            outputs: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            worker_err: Arc::new(Mutex::new(None)),
            stats: Arc::new(SharedStats::default()),
        }
    }

    /// Filter name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filter classification.
    #[inline]
    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    // ---------------------------------------------------------------------
    // PORTS
    // ---------------------------------------------------------------------

    /// Allocates an input buffer for the next input port.
    pub fn add_input(&mut self, config: BufferConfig, spec: InputSpec) -> Result<(), GraphError> {
        let buf = BatchBuffer::new(config)?;
        self.inputs.push(Arc::new(buf));
        self.input_specs.push(spec);
        Ok(())
    }

    /// Declares the next output port.
    pub fn add_output(&mut self, dtype: DType, spec: OutputSpec) {
        self.outputs.push(OutputPort {
            dtype,
            spec,
            sink: None,
        });
    }

    /// Number of input ports.
    #[inline]
    pub fn n_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output ports.
    #[inline]
    pub fn n_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Input buffer at `port`.
    pub fn input(&self, port: usize) -> Option<&Arc<BatchBuffer>> {
        self.inputs.get(port)
    }

    /// Declared constraints of input `port`.
    pub fn input_spec(&self, port: usize) -> Option<&InputSpec> {
        self.input_specs.get(port)
    }

    /// Declared behaviors of output `port`.
    pub fn output_spec(&self, port: usize) -> Option<&OutputSpec> {
        self.outputs.get(port).map(|p| &p.spec)
    }

    /// Mutable behaviors of output `port`, for backward refinement.
    pub fn output_spec_mut(&mut self, port: usize) -> Option<&mut OutputSpec> {
        self.outputs.get_mut(port).map(|p| &mut p.spec)
    }

    /// Declared element type of output `port`.
    pub fn output_dtype(&self, port: usize) -> Option<DType> {
        self.outputs.get(port).map(|p| p.dtype)
    }

    /// Downstream buffer behind output `port`, if connected.
    pub fn sink(&self, port: usize) -> Option<&Arc<BatchBuffer>> {
        self.outputs.get(port).and_then(|p| p.sink.as_ref())
    }

    /// Wires output `port` to a downstream input buffer after checking
    /// element type and width compatibility. Wiring is forbidden while
    /// running.
    pub fn connect_output(
        &mut self,
        port: usize,
        buf: Arc<BatchBuffer>,
    ) -> Result<(), GraphError> {
        if self.state == LifeState::Running {
            return Err(GraphError::Busy);
        }
        let name = self.name.to_string();
        let out = self
            .outputs
            .get_mut(port)
            .ok_or(GraphError::InvalidArg("output port out of range"))?;
        if out.sink.is_some() {
            return Err(GraphError::AlreadyConnected { filter: name, port });
        }
        if out.dtype != buf.dtype() {
            return Err(GraphError::DtypeMismatch {
                output: out.dtype,
                sink: buf.dtype(),
            });
        }
        if out.dtype.size() != buf.data_width() {
            return Err(GraphError::WidthMismatch {
                output: out.dtype.size(),
                sink: buf.data_width(),
            });
        }
        out.sink = Some(buf);
        Ok(())
    }

    /// Errors with `NotConnected` unless output `port` has a sink.
    /// Single-output filters call this from `start`; a worker never
    /// stages onto a dangling port.
    pub fn require_connected(&self, port: usize) -> Result<(), GraphError> {
        if self.sink(port).is_some() {
            Ok(())
        } else {
            Err(GraphError::NotConnected {
                filter: self.name.to_string(),
                port,
            })
        }
    }

    /// Unwires output `port` (connect-time rollback).
    pub fn disconnect_output(&mut self, port: usize) -> Result<(), GraphError> {
        if self.state == LifeState::Running {
            return Err(GraphError::Busy);
        }
        let name = self.name.to_string();
        let out = self
            .outputs
            .get_mut(port)
            .ok_or(GraphError::InvalidArg("output port out of range"))?;
        if out.sink.take().is_none() {
            return Err(GraphError::NotConnected { filter: name, port });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // LIFECYCLE
    // ---------------------------------------------------------------------

    /// `true` between `start` and `stop`.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawns the worker thread running `worker`. The closure receives a
    /// [`WorkerCtx`] owning all runtime state.
    pub fn start_with<F>(&mut self, worker: F) -> Result<(), GraphError>
    where
        F: FnOnce(WorkerCtx) + Send + 'static,
    {
        match self.state {
            LifeState::Running => return Err(GraphError::AlreadyRunning),
            LifeState::Stopped => return Err(GraphError::Busy),
            LifeState::Idle => {}
        }

        *self.worker_err.lock().unwrap() = None;
        self.running.store(true, Ordering::Release);

        let ctx = WorkerCtx {
            name: Arc::clone(&self.name),
            running: Arc::clone(&self.running),
            inputs: self.inputs.clone(),
            sinks: self.outputs.iter().map(|p| p.sink.clone()).collect(),
            stats: Arc::clone(&self.stats),
            err: Arc::clone(&self.worker_err),
        };

        let handle = thread::Builder::new()
            .name(self.name.to_string())
            .spawn(move || worker(ctx))
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                GraphError::Thread(e.to_string())
            })?;

        self.worker = Some(handle);
        self.state = LifeState::Running;
        debug!(filter = %self.name, "started");
        Ok(())
    }

    /// Stops the filter: clears the running flag, force-returns every
    /// wait on its input buffers and on the sink buffers it produces
    /// into, joins the worker, and surfaces any recorded worker fault.
    pub fn stop(&mut self) -> Result<(), GraphError> {
        if self.state != LifeState::Running {
            return Err(GraphError::NotRunning);
        }

        self.running.store(false, Ordering::Release);
        for buf in &self.inputs {
            buf.stop();
        }
        for out in &self.outputs {
            if let Some(sink) = &out.sink {
                sink.stop();
            }
        }

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!(filter = %self.name, "worker panicked");
                let mut slot = self.worker_err.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(WorkerError {
                        kind: ErrorKind::Internal,
                        file: file!(),
                        line: line!(),
                        message: "worker panicked".into(),
                    });
                }
            }
        }

        self.state = LifeState::Stopped;
        debug!(filter = %self.name, "stopped");

        match self.worker_err.lock().unwrap().clone() {
            Some(e) => Err(GraphError::Worker(e)),
            None => Ok(()),
        }
    }

    /// Recorded worker fault, if any.
    pub fn worker_error(&self) -> Option<WorkerError> {
        self.worker_err.lock().unwrap().clone()
    }

    /// Records an externally observed error into the fault slot
    /// (`handle_error` default behavior).
    pub fn record_error(&self, kind: ErrorKind, message: impl Into<String>) {
        let mut slot = self.worker_err.lock().unwrap();
        if slot.is_none() {
            *slot = Some(WorkerError {
                kind,
                file: file!(),
                line: line!(),
                message: message.into(),
            });
        }
    }

    /// Clears the fault slot; forbidden while running (`recover`).
    pub fn clear_error(&mut self) -> Result<(), GraphError> {
        if self.state == LifeState::Running {
            return Err(GraphError::Busy);
        }
        *self.worker_err.lock().unwrap() = None;
        Ok(())
    }

    /// Rewinds runtime state: buffers and counters. Forbidden while
    /// running.
    pub fn reset_runtime(&mut self) -> Result<(), GraphError> {
        if self.state == LifeState::Running {
            return Err(GraphError::Busy);
        }
        for buf in &self.inputs {
            buf.reset();
        }
        self.stats.clear();
        *self.worker_err.lock().unwrap() = None;
        self.state = LifeState::Idle;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // MANAGEMENT
    // ---------------------------------------------------------------------

    /// Processing counter snapshot.
    pub fn stats(&self) -> FilterStats {
        self.stats.snapshot()
    }

    /// Samples queued across all input buffers.
    pub fn backlog(&self) -> u64 {
        self.inputs.iter().map(|b| b.stats().queued_samples).sum()
    }

    /// Health derived from fault slot, running flag and drop counters.
    pub fn health(&self) -> Health {
        if self.worker_err.lock().unwrap().is_some() {
            return Health::Failed;
        }
        if !self.is_running() {
            return Health::Unknown;
        }
        let dropped: u64 = self.inputs.iter().map(|b| b.stats().dropped_batches).sum();
        if dropped > 0 {
            Health::Degraded
        } else {
            Health::Ok
        }
    }

    /// One-paragraph description of the filter and its wiring.
    pub fn describe(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "{} ({}) state={}", self.name, self.kind, self.state_str());
        for (i, buf) in self.inputs.iter().enumerate() {
            let st = buf.stats();
            let _ = writeln!(
                s,
                "  in[{i}]: {} dtype={} batch={} ring={} queued={} dropped={}",
                buf.name(),
                buf.dtype(),
                buf.batch_capacity(),
                buf.capacity(),
                st.queued_batches,
                st.dropped_batches,
            );
        }
        for (i, out) in self.outputs.iter().enumerate() {
            match &out.sink {
                Some(sink) => {
                    let _ = writeln!(s, "  out[{i}]: {} -> {}", out.dtype, sink.name());
                }
                None => {
                    let _ = writeln!(s, "  out[{i}]: {} (unconnected)", out.dtype);
                }
            }
        }
        s
    }

    /// Runtime state dump for debugging.
    pub fn dump_state(&self) -> String {
        let stats = self.stats();
        let mut s = String::new();
        let _ = writeln!(
            s,
            "{}: running={} backlog={} batches={}in/{}out samples={}in/{}out",
            self.name,
            self.is_running(),
            self.backlog(),
            stats.batches_in,
            stats.batches_out,
            stats.samples_in,
            stats.samples_out,
        );
        if let Some(e) = self.worker_error() {
            let _ = writeln!(s, "  fault: {e}");
        }
        s
    }

    fn state_str(&self) -> &'static str {
        match self.state {
            LifeState::Idle => "idle",
            LifeState::Running => "running",
            LifeState::Stopped => "stopped",
        }
    }
}

impl Drop for FilterCore {
    fn drop(&mut self) {
        if self.state == LifeState::Running {
            let _ = self.stop();
        }
    }
}

/// The node interface: lifecycle, wiring hooks for the graph, and the
/// management operations, with defaults that fit most archetypes.
pub trait Filter: Send {
    /// Shared runtime core.
    fn core(&self) -> &FilterCore;

    /// Shared runtime core, mutable.
    fn core_mut(&mut self) -> &mut FilterCore;

    /// Spawns this filter's worker. Archetype-specific.
    fn start(&mut self) -> Result<(), GraphError>;

    /// Filter name.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Filter classification.
    fn kind(&self) -> FilterKind {
        self.core().kind()
    }

    /// Stops the worker and surfaces its fault, if any.
    fn stop(&mut self) -> Result<(), GraphError> {
        self.core_mut().stop()
    }

    /// Backward-refinement hook: adjust declared output properties from
    /// the now-connected sinks. Returns `true` when anything changed so
    /// the graph repeats forward propagation. Default: nothing to refine.
    fn refine_outputs(&mut self) -> bool {
        false
    }

    /// Human-readable description.
    fn describe(&self) -> String {
        self.core().describe()
    }

    /// Processing counters.
    fn stats(&self) -> FilterStats {
        self.core().stats()
    }

    /// Health summary.
    fn health(&self) -> Health {
        self.core().health()
    }

    /// Queued samples across inputs.
    fn backlog(&self) -> u64 {
        self.core().backlog()
    }

    /// Runtime state dump.
    fn dump_state(&self) -> String {
        self.core().dump_state()
    }

    /// Pushes buffered state downstream. Default: nothing is buffered
    /// outside the worker, so this is a no-op.
    fn flush(&mut self) -> Result<(), GraphError> {
        Ok(())
    }

    /// Rewinds runtime state. Forbidden while running.
    fn reset(&mut self) -> Result<(), GraphError> {
        self.core_mut().reset_runtime()
    }

    /// Applies a new configuration. Default: unsupported.
    fn reconfigure(&mut self, _config: &dyn Any) -> Result<(), GraphError> {
        Err(GraphError::NotImplemented)
    }

    /// Reacts to an externally observed error. Default: record it.
    fn handle_error(&mut self, kind: ErrorKind) -> Result<(), GraphError> {
        self.core().record_error(kind, "reported via handle_error");
        Ok(())
    }

    /// Attempts recovery after a fault. Default: clear the fault slot
    /// (only when stopped).
    fn recover(&mut self) -> Result<(), GraphError> {
        self.core_mut().clear_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::InputSpec;
    use std::time::Duration;

    fn idle_core() -> FilterCore {
        let mut core = FilterCore::new("uut", FilterKind::Map);
        core.add_input(
            BufferConfig::new("uut.in0", DType::F32),
            InputSpec::new(),
        )
        .unwrap();
        core.add_output(DType::F32, OutputSpec::preserve_all());
        core
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut core = idle_core();
        assert!(matches!(core.stop(), Err(GraphError::NotRunning)));

        core.start_with(|ctx| {
            while ctx.is_running() {
                std::thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
        assert!(core.is_running());
        assert!(matches!(
            core.start_with(|_| {}),
            Err(GraphError::AlreadyRunning)
        ));

        core.stop().unwrap();
        assert!(!core.is_running());
        assert!(matches!(core.stop(), Err(GraphError::NotRunning)));
        // Lifecycle is linear: no restart after stop.
        assert!(matches!(core.start_with(|_| {}), Err(GraphError::Busy)));
    }

    #[test]
    fn test_stop_surfaces_worker_fault() {
        let mut core = idle_core();
        core.start_with(|ctx| {
            ctx.fail(crate::worker_error!(ErrorKind::Underflow, "ran dry"));
        })
        .unwrap();

        // Worker exits immediately; stop must join and surface the fault.
        let err = core.stop().unwrap_err();
        match err {
            GraphError::Worker(w) => {
                assert_eq!(w.kind, ErrorKind::Underflow);
                assert_eq!(w.message, "ran dry");
            }
            other => panic!("expected worker fault, got {other:?}"),
        }
        assert_eq!(core.health(), Health::Failed);
    }

    #[test]
    fn test_connect_checks() {
        let mut core = idle_core();
        let good = Arc::new(
            BatchBuffer::new(BufferConfig::new("down.in0", DType::F32)).unwrap(),
        );
        let bad = Arc::new(
            BatchBuffer::new(BufferConfig::new("down.in1", DType::U16)).unwrap(),
        );

        assert!(matches!(
            core.connect_output(0, Arc::clone(&bad)),
            Err(GraphError::DtypeMismatch { .. })
        ));
        core.connect_output(0, Arc::clone(&good)).unwrap();
        assert!(matches!(
            core.connect_output(0, good),
            Err(GraphError::AlreadyConnected { .. })
        ));
        assert!(matches!(
            core.connect_output(7, bad),
            Err(GraphError::InvalidArg(_))
        ));

        core.disconnect_output(0).unwrap();
        assert!(matches!(
            core.disconnect_output(0),
            Err(GraphError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_health_transitions() {
        let mut core = idle_core();
        assert_eq!(core.health(), Health::Unknown);

        core.start_with(|ctx| {
            while ctx.is_running() {
                std::thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
        assert_eq!(core.health(), Health::Ok);

        core.stop().unwrap();
        assert_eq!(core.health(), Health::Unknown);

        core.record_error(ErrorKind::Overflow, "drops observed");
        assert_eq!(core.health(), Health::Failed);
        core.clear_error().unwrap();
        assert_eq!(core.health(), Health::Unknown);
    }

    #[test]
    fn test_describe_mentions_ports() {
        let core = idle_core();
        let text = core.describe();
        assert!(text.contains("uut (map)"));
        assert!(text.contains("in[0]: uut.in0"));
        assert!(text.contains("out[0]: f32 (unconnected)"));
    }
}
