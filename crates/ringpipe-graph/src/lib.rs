//! ringpipe-graph - Filter Runtime and Graph Wiring
//!
//! The execution layer above the `ringpipe` transport: filters own their
//! input buffers and exactly one worker thread; a [`Graph`] wires output
//! ports to downstream input buffers with connection-time validation
//! (element types, widths, declared properties, cycles).
//!
//! # Model
//!
//! - One worker thread per running filter; workers communicate only
//!   through batch buffers.
//! - `stop` force-returns every blocked wait and joins the worker;
//!   worker faults are recorded, not thrown.
//! - End-of-stream rides in a normal batch slot (`Complete` status) and
//!   cascades downstream even under backpressure.
//! - Per-port property declarations ([`OutputSpec`]/[`InputSpec`]) are
//!   propagated topologically and checked on every edge, with a
//!   backward refinement pass for filters that adapt to their sinks.

mod error;
mod filter;
mod graph;
mod properties;
mod worker;

pub use error::{GraphError, TypeError, WorkerError};
pub use filter::{Filter, FilterCore, FilterKind, Health};
pub use graph::{FilterId, Graph};
pub use properties::{
    Behavior, Constraint, InputSpec, OutputSpec, PropValue, Property, PropertyTable,
};
pub use worker::{FilterStats, SharedStats, WorkerCtx};
