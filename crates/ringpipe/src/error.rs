//! Error kinds shared across the runtime.
//!
//! [`ErrorKind`] is the single code↔message table; higher layers wrap it
//! with structured context where useful. Reporting never allocates beyond
//! the message strings baked into the table.

use thiserror::Error;

/// Every error kind the runtime surfaces.
///
/// `Timeout` and `Stopped` are recoverable transport conditions, not
/// faults; workers retry after observing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// An argument was out of range or referenced a nonexistent port.
    #[error("invalid argument")]
    InvalidArg,
    /// A configuration field was missing or out of bounds.
    #[error("invalid configuration")]
    InvalidConfig,
    /// The output port already has a downstream buffer.
    #[error("already connected")]
    AlreadyConnected,
    /// The port has no downstream buffer.
    #[error("not connected")]
    NotConnected,
    /// Declared element types differ across an edge.
    #[error("element type mismatch")]
    DtypeMismatch,
    /// Declared data widths differ across an edge.
    #[error("data width mismatch")]
    WidthMismatch,
    /// A declared port property violates a downstream constraint.
    #[error("type constraint violation")]
    TypeConstraintViolation,
    /// The requested edge would close a cycle.
    #[error("cycle detected")]
    CycleDetected,
    /// `start` on a running filter.
    #[error("already running")]
    AlreadyRunning,
    /// `stop` on a stopped filter.
    #[error("not running")]
    NotRunning,
    /// The operation is forbidden in the current lifecycle state.
    #[error("busy")]
    Busy,
    /// A bounded wait elapsed. Normal, not a fault.
    #[error("timed out")]
    Timeout,
    /// A wait was force-returned by `stop`.
    #[error("stopped")]
    Stopped,
    /// The ring overflowed under a drop policy.
    #[error("overflow")]
    Overflow,
    /// A consumer drained more than was published.
    #[error("underflow")]
    Underflow,
    /// End of an external stream (source/sink adapters).
    #[error("end of stream")]
    Eof,
    /// Allocation failed at init.
    #[error("allocation failed")]
    Alloc,
    /// Worker thread could not be spawned.
    #[error("thread spawn failed")]
    Thread,
    /// The operation is not supported by this filter.
    #[error("not implemented")]
    NotImplemented,
    /// An internal invariant was violated.
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// Returns `true` for conditions workers handle locally and retry.
    #[inline]
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Timeout | Self::Stopped)
    }

    /// Returns `true` for wiring/validation kinds reported at connect time.
    #[inline]
    pub fn is_wiring(self) -> bool {
        matches!(
            self,
            Self::InvalidArg
                | Self::InvalidConfig
                | Self::AlreadyConnected
                | Self::NotConnected
                | Self::DtypeMismatch
                | Self::WidthMismatch
                | Self::TypeConstraintViolation
                | Self::CycleDetected
        )
    }
}

/// Errors returned by blocking buffer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The wait elapsed before space/data became available.
    #[error("buffer wait timed out")]
    Timeout,
    /// The buffer was stopped while (or before) waiting.
    #[error("buffer stopped")]
    Stopped,
}

impl BufferError {
    /// Maps onto the shared kind table.
    #[inline]
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            Self::Stopped => ErrorKind::Stopped,
        }
    }
}

/// A rejected configuration, with the offending field named.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {field}: {reason}")]
pub struct ConfigError {
    /// Field that failed validation.
    pub field: &'static str,
    /// What was wrong with it.
    pub reason: String,
}

impl ConfigError {
    /// Builds a rejection for `field`.
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    /// Maps onto the shared kind table.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidConfig
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(ErrorKind::Timeout.is_recoverable());
        assert!(ErrorKind::Stopped.is_recoverable());
        assert!(!ErrorKind::Internal.is_recoverable());
        assert!(!ErrorKind::CycleDetected.is_recoverable());
    }

    #[test]
    fn test_buffer_error_kind() {
        assert_eq!(BufferError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(BufferError::Stopped.kind(), ErrorKind::Stopped);
    }

    #[test]
    fn test_messages_stable() {
        assert_eq!(ErrorKind::CycleDetected.to_string(), "cycle detected");
        assert_eq!(ErrorKind::Timeout.to_string(), "timed out");
    }
}
