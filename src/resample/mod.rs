//! Rate matching and arbitrary-ratio resampling
//!
//! - rate: pick the hardware interpolation factor and the residual ratio
//! - pfb: polyphase filter bank resampler that realizes the residual ratio

pub mod pfb;
pub mod rate;

pub use pfb::PfbArbResampler;
pub use rate::{RateError, ResamplingPlan};

use crate::dsp::ComplexSample;

/// Streaming rate converter.
///
/// Implementations keep only bounded filter history between calls, so they
/// compose with unbounded or looping sources.
pub trait Resampler: Send {
    /// Resample one block, appending the result to `output`.
    ///
    /// Returns the number of samples appended.
    fn process(&mut self, input: &[ComplexSample], output: &mut Vec<ComplexSample>) -> usize;

    /// Output rate over input rate
    fn ratio(&self) -> f64;

    /// Filter delay, in input samples
    fn group_delay(&self) -> f64;

    /// Forget history and phase
    fn reset(&mut self);
}
