//! Wiring, lifecycle and worker error types.

use crate::properties::Property;
use ringpipe::{ConfigError, DType, ErrorKind};
use thiserror::Error;

/// Structured expected-vs-actual report for a property constraint that
/// failed validation, naming the edge endpoint it failed on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{filter}.in[{port}]: {property}: expected {expected}, got {actual}")]
pub struct TypeError {
    /// Downstream filter whose input constraint was violated.
    pub filter: String,
    /// Input port index on that filter.
    pub port: usize,
    /// The property that failed.
    pub property: Property,
    /// What the constraint demanded.
    pub expected: String,
    /// What the upstream output declared or computed.
    pub actual: String,
}

impl TypeError {
    /// Maps onto the shared kind table.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TypeConstraintViolation
    }
}

/// Error record a worker leaves behind when it dies: the kind, where in
/// the source it was raised, and a short message. Surfaced by `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at {file}:{line}: {message}")]
pub struct WorkerError {
    /// Error kind from the shared table.
    pub kind: ErrorKind,
    /// Source file that raised the error.
    pub file: &'static str,
    /// Source line that raised the error.
    pub line: u32,
    /// Short human-readable context.
    pub message: String,
}

/// Builds a [`WorkerError`] capturing the call site.
///
/// ```
/// use ringpipe::ErrorKind;
/// use ringpipe_graph::worker_error;
///
/// let e = worker_error!(ErrorKind::Internal, "cursor ran past head by {}", 3);
/// assert_eq!(e.kind, ErrorKind::Internal);
/// ```
#[macro_export]
macro_rules! worker_error {
    ($kind:expr, $($arg:tt)*) => {
        $crate::WorkerError {
            kind: $kind,
            file: file!(),
            line: line!(),
            message: format!($($arg)*),
        }
    };
}

/// Errors surfaced by wiring, validation and lifecycle operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// Argument out of range (port index, filter id, ...).
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),
    /// Configuration rejected at filter init.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
    /// The output port already has a downstream buffer.
    #[error("{filter}.out[{port}] is already connected")]
    AlreadyConnected {
        /// Filter owning the port.
        filter: String,
        /// Port index.
        port: usize,
    },
    /// A required input has no upstream edge.
    #[error("{filter}.in[{port}] is required but not connected")]
    NotConnected {
        /// Filter owning the port.
        filter: String,
        /// Port index.
        port: usize,
    },
    /// Declared element types differ across the edge.
    #[error("element type mismatch: output is {output}, sink buffer is {sink}")]
    DtypeMismatch {
        /// Upstream output's declared element type.
        output: DType,
        /// Downstream buffer's declared element type.
        sink: DType,
    },
    /// Declared data widths differ across the edge.
    #[error("data width mismatch: output is {output} bytes, sink buffer is {sink} bytes")]
    WidthMismatch {
        /// Upstream sample width.
        output: usize,
        /// Downstream sample width.
        sink: usize,
    },
    /// A declared property violates a downstream constraint.
    #[error(transparent)]
    Constraint(#[from] TypeError),
    /// The requested edge would close a cycle.
    #[error("edge {from} -> {to} would create a cycle")]
    CycleDetected {
        /// Upstream filter name.
        from: String,
        /// Downstream filter name.
        to: String,
    },
    /// `start` on a running filter.
    #[error("already running")]
    AlreadyRunning,
    /// `stop` on a filter that is not running.
    #[error("not running")]
    NotRunning,
    /// Operation forbidden in the current lifecycle state.
    #[error("busy")]
    Busy,
    /// Worker thread could not be spawned.
    #[error("worker thread spawn failed: {0}")]
    Thread(String),
    /// The filter does not support this operation.
    #[error("not implemented")]
    NotImplemented,
    /// A worker died with a recorded fault.
    #[error("worker fault: {0}")]
    Worker(WorkerError),
}

impl GraphError {
    /// Maps onto the shared kind table.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArg(_) => ErrorKind::InvalidArg,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::AlreadyConnected { .. } => ErrorKind::AlreadyConnected,
            Self::NotConnected { .. } => ErrorKind::NotConnected,
            Self::DtypeMismatch { .. } => ErrorKind::DtypeMismatch,
            Self::WidthMismatch { .. } => ErrorKind::WidthMismatch,
            Self::Constraint(_) => ErrorKind::TypeConstraintViolation,
            Self::CycleDetected { .. } => ErrorKind::CycleDetected,
            Self::AlreadyRunning => ErrorKind::AlreadyRunning,
            Self::NotRunning => ErrorKind::NotRunning,
            Self::Busy => ErrorKind::Busy,
            Self::Thread(_) => ErrorKind::Thread,
            Self::NotImplemented => ErrorKind::NotImplemented,
            Self::Worker(e) => e.kind,
        }
    }
}
