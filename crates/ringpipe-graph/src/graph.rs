//! Graph assembly: wiring filters together with connection-time
//! validation, cycle rejection and property propagation.

use crate::error::GraphError;
use crate::filter::Filter;
use crate::properties::{Property, PropertyTable, PropValue};
use std::collections::VecDeque;
use tracing::debug;

/// Handle to a filter owned by a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterId(usize);

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: usize,
    out_port: usize,
    to: usize,
    in_port: usize,
}

/// A DAG of filters plus the edges implied by their sink references.
///
/// The graph owns its filters; wiring goes through [`connect`], which
/// checks element type and width, rejects cycles and double
/// connections, and re-validates declared properties over the whole
/// graph after every new edge. A failed connect leaves the graph
/// unchanged.
///
/// [`connect`]: Graph::connect
#[derive(Default)]
pub struct Graph {
    filters: Vec<Box<dyn Filter>>,
    edges: Vec<Edge>,
    resolved: Vec<Vec<PropertyTable>>,
}

impl Graph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a filter.
    pub fn add(&mut self, filter: impl Filter + 'static) -> FilterId {
        self.filters.push(Box::new(filter));
        self.resolved.push(Vec::new());
        FilterId(self.filters.len() - 1)
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// `true` when no filters were added.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Filter behind `id`.
    pub fn get(&self, id: FilterId) -> Option<&dyn Filter> {
        self.filters.get(id.0).map(|f| &**f)
    }

    /// Filter behind `id`, mutable.
    pub fn get_mut(&mut self, id: FilterId) -> Option<&mut (dyn Filter + 'static)> {
        self.filters.get_mut(id.0).map(|f| &mut **f)
    }

    /// Computed output properties of `id.out[port]` after the last
    /// successful validation pass.
    pub fn output_properties(&self, id: FilterId, port: usize) -> Option<&PropertyTable> {
        self.resolved.get(id.0).and_then(|v| v.get(port))
    }

    /// Wires `from.out[out_port]` into `to.in[in_port]`.
    ///
    /// Checks, in order: port existence, double connection (an output
    /// feeds one buffer; a buffer is fed by one producer), cycles,
    /// element type and width across the edge, then property
    /// constraints over the whole graph. Any failure rolls the edge
    /// back.
    pub fn connect(
        &mut self,
        from: FilterId,
        out_port: usize,
        to: FilterId,
        in_port: usize,
    ) -> Result<(), GraphError> {
        let (f, t) = (from.0, to.0);
        if f >= self.filters.len() || t >= self.filters.len() {
            return Err(GraphError::InvalidArg("filter id out of range"));
        }
        if out_port >= self.filters[f].core().n_outputs() {
            return Err(GraphError::InvalidArg("output port out of range"));
        }
        if in_port >= self.filters[t].core().n_inputs() {
            return Err(GraphError::InvalidArg("input port out of range"));
        }
        if self
            .edges
            .iter()
            .any(|e| e.to == t && e.in_port == in_port)
        {
            return Err(GraphError::AlreadyConnected {
                filter: self.filters[t].name().to_string(),
                port: in_port,
            });
        }
        if f == t || self.reaches(t, f) {
            return Err(GraphError::CycleDetected {
                from: self.filters[f].name().to_string(),
                to: self.filters[t].name().to_string(),
            });
        }

        let buf = self.filters[t]
            .core()
            .input(in_port)
            .cloned()
            .ok_or(GraphError::InvalidArg("input port out of range"))?;
        self.filters[f].core_mut().connect_output(out_port, buf)?;
        self.edges.push(Edge {
            from: f,
            out_port,
            to: t,
            in_port,
        });

        if let Err(e) = self.propagate() {
            // Roll back: the graph must be unchanged on failure.
            self.edges.pop();
            let _ = self.filters[f].core_mut().disconnect_output(out_port);
            return Err(e);
        }

        debug!(
            from = self.filters[f].name(),
            to = self.filters[t].name(),
            "connected"
        );
        Ok(())
    }

    /// `true` when `to` is reachable from `from` along existing edges.
    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut seen = vec![false; self.filters.len()];
        let mut queue = VecDeque::from([from]);
        while let Some(node) = queue.pop_front() {
            if node == to {
                return true;
            }
            if std::mem::replace(&mut seen[node], true) {
                continue;
            }
            for e in self.edges.iter().filter(|e| e.from == node) {
                queue.push_back(e.to);
            }
        }
        false
    }

    /// Kahn topological order; sources first.
    fn topo_order(&self) -> Result<Vec<usize>, GraphError> {
        let n = self.filters.len();
        let mut indegree = vec![0usize; n];
        for e in &self.edges {
            indegree[e.to] += 1;
        }
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for e in self.edges.iter().filter(|e| e.from == i) {
                indegree[e.to] -= 1;
                if indegree[e.to] == 0 {
                    queue.push_back(e.to);
                }
            }
        }
        if order.len() != n {
            // Pick any edge still inside the cycle for the report.
            let e = self
                .edges
                .iter()
                .find(|e| indegree[e.to] > 0)
                .expect("cycle implies a blocked edge");
            return Err(GraphError::CycleDetected {
                from: self.filters[e.from].name().to_string(),
                to: self.filters[e.to].name().to_string(),
            });
        }
        Ok(order)
    }

    /// Two-pass fixed-point property propagation: forward along the
    /// topological order, then let filters refine their declarations
    /// from their sinks, repeating until stable (bounded by graph
    /// depth). Finishes by checking every edge's input constraints.
    fn propagate(&mut self) -> Result<(), GraphError> {
        let order = self.topo_order()?;
        let mut resolved: Vec<Vec<PropertyTable>> = self
            .filters
            .iter()
            .map(|f| vec![PropertyTable::new(); f.core().n_outputs()])
            .collect();

        // Fixed point bounded by depth: one extra pass detects stability.
        for _ in 0..=self.filters.len() {
            for &i in &order {
                let n_inputs = self.filters[i].core().n_inputs();
                let in_tables: Vec<PropertyTable> = (0..n_inputs)
                    .map(|p| {
                        self.edges
                            .iter()
                            .find(|e| e.to == i && e.in_port == p)
                            .map(|e| resolved[e.from][e.out_port])
                            .unwrap_or_default()
                    })
                    .collect();
                let merged = PropertyTable::merge(&in_tables);

                let core = self.filters[i].core();
                for port in 0..core.n_outputs() {
                    let spec = core.output_spec(port).expect("port exists");
                    let mut table = spec.apply(&merged);
                    // The element type is always statically known: it is
                    // the port's declared dtype.
                    if let Some(dtype) = core.output_dtype(port) {
                        table.set(Property::ElementType, PropValue::DType(dtype));
                    }
                    resolved[i][port] = table;
                }
            }

            let mut changed = false;
            for i in 0..self.filters.len() {
                if self.filters[i].refine_outputs() {
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for e in &self.edges {
            let table = &resolved[e.from][e.out_port];
            let spec = self.filters[e.to]
                .core()
                .input_spec(e.in_port)
                .expect("port exists");
            spec.check(table, self.filters[e.to].name(), e.in_port)?;
        }

        self.resolved = resolved;
        Ok(())
    }

    /// Rejects disconnected required inputs. Disconnected outputs are
    /// allowed.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (i, filter) in self.filters.iter().enumerate() {
            let core = filter.core();
            for port in 0..core.n_inputs() {
                let required = core
                    .input_spec(port)
                    .is_some_and(crate::properties::InputSpec::is_required);
                let connected = self
                    .edges
                    .iter()
                    .any(|e| e.to == i && e.in_port == port);
                if required && !connected {
                    return Err(GraphError::NotConnected {
                        filter: filter.name().to_string(),
                        port,
                    });
                }
            }
        }
        Ok(())
    }

    /// Validates, then starts every filter, sinks first so no producer
    /// runs ahead of its consumer's worker.
    pub fn start(&mut self) -> Result<(), GraphError> {
        self.validate()?;
        let order = self.topo_order()?;
        let started: Vec<usize> = order.iter().rev().copied().collect();
        for (pos, &i) in started.iter().enumerate() {
            if let Err(e) = self.filters[i].start() {
                // Unwind the ones already running, sources-last.
                for &j in started[..pos].iter().rev() {
                    let _ = self.filters[j].stop();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stops every filter, sources first so completion can drain
    /// downstream. Returns the first worker fault encountered; all
    /// filters are stopped regardless.
    pub fn stop(&mut self) -> Result<(), GraphError> {
        let order = self.topo_order()?;
        let mut first_err = None;
        for &i in &order {
            match self.filters[i].stop() {
                Ok(()) | Err(GraphError::NotRunning) => {}
                Err(e) if first_err.is_none() => first_err = Some(e),
                Err(_) => {}
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterCore, FilterKind};
    use crate::properties::{Constraint, InputSpec, OutputSpec};
    use ringpipe::{BufferConfig, DType};

    /// Inert pass-through filter with configurable port declarations.
    struct TestFilter {
        core: FilterCore,
    }

    impl TestFilter {
        fn new(
            name: &str,
            inputs: Vec<InputSpec>,
            outputs: Vec<(DType, OutputSpec)>,
        ) -> Self {
            let kind = if inputs.is_empty() {
                FilterKind::Source
            } else if outputs.is_empty() {
                FilterKind::Sink
            } else {
                FilterKind::Map
            };
            let mut core = FilterCore::new(name, kind);
            for (i, spec) in inputs.into_iter().enumerate() {
                core.add_input(
                    BufferConfig::new(format!("{name}.in{i}"), DType::F32),
                    spec,
                )
                .unwrap();
            }
            for (dtype, spec) in outputs {
                core.add_output(dtype, spec);
            }
            Self { core }
        }

        fn passthrough(name: &str) -> Self {
            Self::new(
                name,
                vec![InputSpec::new()],
                vec![(DType::F32, OutputSpec::preserve_all())],
            )
        }
    }

    impl Filter for TestFilter {
        fn core(&self) -> &FilterCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut FilterCore {
            &mut self.core
        }
        fn start(&mut self) -> Result<(), GraphError> {
            self.core.start_with(|ctx| {
                while ctx.is_running() {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
            })
        }
    }

    fn source(name: &str, spec: OutputSpec) -> TestFilter {
        TestFilter::new(name, vec![], vec![(DType::F32, spec)])
    }

    #[test]
    fn test_cycle_rejected_graph_unchanged() {
        let mut g = Graph::new();
        let a = g.add(TestFilter::passthrough("a"));
        let b = g.add(TestFilter::passthrough("b"));
        let c = g.add(TestFilter::passthrough("c"));

        g.connect(a, 0, b, 0).unwrap();
        g.connect(b, 0, c, 0).unwrap();

        let err = g.connect(c, 0, a, 0).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
        // The rejected edge left no trace.
        assert!(g.get(c).unwrap().core().sink(0).is_none());
        assert_eq!(g.edges.len(), 2);
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut g = Graph::new();
        let a = g.add(TestFilter::passthrough("a"));
        assert!(matches!(
            g.connect(a, 0, a, 0),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_double_connect_input_rejected() {
        let mut g = Graph::new();
        let a = g.add(source("a", OutputSpec::new()));
        let b = g.add(source("b", OutputSpec::new()));
        let c = g.add(TestFilter::passthrough("c"));

        g.connect(a, 0, c, 0).unwrap();
        // A second producer into the same buffer would break SPSC.
        assert!(matches!(
            g.connect(b, 0, c, 0),
            Err(GraphError::AlreadyConnected { .. })
        ));
    }

    #[test]
    fn test_dtype_mismatch_rejected() {
        let mut g = Graph::new();
        let a = g.add(TestFilter::new(
            "a",
            vec![],
            vec![(DType::U32, OutputSpec::new())],
        ));
        let b = g.add(TestFilter::passthrough("b")); // f32 input buffer
        assert!(matches!(
            g.connect(a, 0, b, 0),
            Err(GraphError::DtypeMismatch { .. })
        ));
    }

    #[test]
    fn test_properties_propagate_through_preserve() {
        let mut g = Graph::new();
        let src = g.add(source(
            "src",
            OutputSpec::new()
                .set(Property::PeriodNs, PropValue::U64(1_000))
                .set(Property::Regular, PropValue::Bool(true)),
        ));
        let mid = g.add(TestFilter::passthrough("mid"));
        let dst = g.add(TestFilter::passthrough("dst"));

        g.connect(src, 0, mid, 0).unwrap();
        g.connect(mid, 0, dst, 0).unwrap();

        let table = g.output_properties(mid, 0).unwrap();
        assert_eq!(table.period_ns(), Some(1_000));
        assert_eq!(table.regular(), Some(true));
        assert_eq!(table.dtype(), Some(DType::F32));
    }

    #[test]
    fn test_constraint_violation_rolls_back() {
        let mut g = Graph::new();
        let src = g.add(source(
            "src",
            OutputSpec::new().set(Property::Regular, PropValue::Bool(false)),
        ));
        let sink = g.add(TestFilter::new(
            "sink",
            vec![InputSpec::new().constrain(Property::Regular, Constraint::Flag(true))],
            vec![],
        ));

        let err = g.connect(src, 0, sink, 0).unwrap_err();
        assert!(matches!(err, GraphError::Constraint(_)));
        assert!(g.get(src).unwrap().core().sink(0).is_none());
        assert!(g.edges.is_empty());
    }

    #[test]
    fn test_validate_requires_connected_inputs() {
        let mut g = Graph::new();
        let src = g.add(source("src", OutputSpec::new()));
        let mid = g.add(TestFilter::passthrough("mid"));
        let opt = g.add(TestFilter::new(
            "opt",
            vec![InputSpec::new().optional()],
            vec![],
        ));

        assert!(matches!(
            g.validate(),
            Err(GraphError::NotConnected { .. })
        ));
        g.connect(src, 0, mid, 0).unwrap();
        // Optional input may stay dangling.
        let _ = opt;
        g.validate().unwrap();
    }

    #[test]
    fn test_start_stop_roundtrip() {
        let mut g = Graph::new();
        let src = g.add(source("src", OutputSpec::new()));
        let dst = g.add(TestFilter::new("dst", vec![InputSpec::new()], vec![]));

        g.connect(src, 0, dst, 0).unwrap();
        g.start().unwrap();
        assert!(g.get(src).unwrap().core().is_running());
        assert!(g.get(dst).unwrap().core().is_running());
        g.stop().unwrap();
        assert!(!g.get(src).unwrap().core().is_running());
        assert!(!g.get(dst).unwrap().core().is_running());
    }
}
