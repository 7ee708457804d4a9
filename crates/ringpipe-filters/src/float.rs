//! Float element types the interpolating filters operate on.

use ringpipe::Sample;

/// Samples the interpolating archetypes (aligner, regularizer,
/// resampler, gap filler) can do arithmetic on. Integer streams go
/// through a [`Map`](crate::Map) widening step first.
pub trait FloatSample: Sample {
    /// Widens to f64 for interpolation math.
    fn to_f64(self) -> f64;
    /// Narrows back from f64.
    fn from_f64(v: f64) -> Self;
}

impl FloatSample for f32 {
    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }
    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl FloatSample for f64 {
    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }
}
