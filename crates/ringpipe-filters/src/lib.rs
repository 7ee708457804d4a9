//! ringpipe-filters - Canonical Filter Archetypes
//!
//! The filters every real pipeline is built from, each obeying the
//! worker contract of `ringpipe-graph`:
//!
//! - [`Map`] / [`StatefulMap`] — 1-in/1-out element-wise transforms that
//!   re-batch to the sink's batch capacity
//! - [`FunctionGenerator`] — counter-driven source with optional
//!   real-time pacing
//! - [`Tee`] — 1-in/N-out distributor (duplicate, round-robin,
//!   load-balance with a pluggable policy, conditional)
//! - [`BatchMatcher`] — re-frames a regular, grid-aligned stream onto
//!   zero-phase batch boundaries sized for its sink
//! - [`SampleAligner`] — interpolates a phase-shifted regular stream
//!   onto its own sample grid
//! - [`Regularizer`] — turns an irregular event stream into a fixed
//!   rate by hold or linear interpolation
//! - [`Resampler`] — rate conversion with selectable quality
//! - [`TimeWindowSync`] — N-in/N-out truncation to time overlap
//! - [`GapFiller`] — fills bounded gaps, flagging synthetic samples
//! - [`VecSource`], [`CollectSink`], [`NullSink`] — in-memory endpoints
//!   for tests, demos and embedding
//!
//! Multi-input math is composed, never improvised: align each stream
//! ([`SampleAligner`]), frame it ([`BatchMatcher`]), synchronize the
//! set ([`TimeWindowSync`]), and only then apply a multi-input
//! element-wise operator that may assume sample-aligned inputs.

mod aligner;
mod float;
mod funcgen;
mod gap_filler;
mod map;
mod matcher;
mod pump;
mod regularizer;
mod resampler;
mod sink;
mod source;
mod tee;
mod window_sync;

pub use aligner::SampleAligner;
pub use float::FloatSample;
pub use funcgen::{FuncGenConfig, FunctionGenerator};
pub use gap_filler::{GapFillMeta, GapFiller};
pub use map::{Map, StatefulMap};
pub use matcher::BatchMatcher;
pub use regularizer::{RegularizeMode, Regularizer};
pub use resampler::{Quality, Resampler};
pub use sink::{BatchInfo, CollectHandle, CollectSink, Collected, NullSink};
pub use source::VecSource;
pub use tee::{BalancePolicy, LeastBacklog, Tee, TeeMode};
pub use window_sync::TimeWindowSync;

use ringpipe::{BufferConfig, ConfigError, Sample};

/// Checks that a buffer config carries the element type the filter is
/// instantiated with.
pub(crate) fn check_input_dtype<T: Sample>(config: &BufferConfig) -> Result<(), ConfigError> {
    if config.dtype != T::DTYPE {
        return Err(ConfigError::new(
            "dtype",
            format!(
                "input buffer declares {}, filter element type is {}",
                config.dtype,
                T::DTYPE
            ),
        ));
    }
    Ok(())
}
