//! Signal conditioning
//!
//! - firdes: prototype low-pass and Hilbert FIR design
//! - hilbert: real to analytic conversion
//! - Conditioner: the tagged front stage of the transmit graph

pub mod firdes;
pub mod hilbert;

pub use num_complex;

pub use firdes::FilterSpec;
pub use hilbert::HilbertTransform;

use crate::source::{SampleBuf, SampleFormat};

/// Floating point type used for signal processing.
pub type Sample = f32;
/// Complex floating point type used for signal processing.
pub type ComplexSample = num_complex::Complex<Sample>;

/// Front stage of the transmit graph, selected by the source sample format.
enum Stage {
    /// Source is already complex, samples pass through untouched
    Passthrough,
    /// Source is real, quadrature is synthesized by a Hilbert filter
    Analytic(HilbertTransform),
}

/// Turns whatever the source produces into a complex stream at the same rate.
pub struct Conditioner {
    stage: Stage,
    scratch: Vec<ComplexSample>,
}

impl Conditioner {
    /// Pick the stage for a source format.
    ///
    /// `hilbert_taps` is only used for real sources.
    pub fn for_format(format: SampleFormat, hilbert_taps: usize) -> Self {
        let stage = match format {
            SampleFormat::Complex => Stage::Passthrough,
            SampleFormat::Real => Stage::Analytic(HilbertTransform::new(hilbert_taps)),
        };
        Self {
            stage,
            scratch: Vec::new(),
        }
    }

    /// Whether this stage synthesizes the quadrature component
    pub fn is_analytic(&self) -> bool {
        matches!(self.stage, Stage::Analytic(_))
    }

    /// Delay in samples added by this stage
    pub fn group_delay(&self) -> usize {
        match &self.stage {
            Stage::Passthrough => 0,
            Stage::Analytic(hilbert) => hilbert.group_delay(),
        }
    }

    /// Condition one block.
    ///
    /// Complex input on a passthrough stage is returned as-is. A real block
    /// reaching a passthrough stage is widened with a zero quadrature, a
    /// complex block reaching an analytic stage passes through.
    pub fn process<'a>(&'a mut self, block: &'a SampleBuf) -> &'a [ComplexSample] {
        match (&mut self.stage, block) {
            (Stage::Analytic(hilbert), SampleBuf::Real(samples)) => {
                hilbert.process_into(samples, &mut self.scratch);
                &self.scratch
            }
            (Stage::Passthrough, SampleBuf::Real(samples)) => {
                self.scratch.clear();
                self.scratch
                    .extend(samples.iter().map(|&s| ComplexSample::new(s, 0.0)));
                &self.scratch
            }
            (_, SampleBuf::Complex(samples)) => samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_is_identity() {
        let mut conditioner = Conditioner::for_format(SampleFormat::Complex, 64);
        assert!(!conditioner.is_analytic());
        assert_eq!(conditioner.group_delay(), 0);

        let input: Vec<ComplexSample> = (0..100)
            .map(|i| ComplexSample::new(i as f32, -(i as f32) * 0.5))
            .collect();
        let block = SampleBuf::Complex(input.clone());
        assert_eq!(conditioner.process(&block), &input[..]);
    }

    #[test]
    fn test_analytic_keeps_sample_count() {
        let mut conditioner = Conditioner::for_format(SampleFormat::Real, 64);
        assert!(conditioner.is_analytic());
        assert_eq!(conditioner.group_delay(), 32);

        for len in [1usize, 17, 1000] {
            let block = SampleBuf::Real(vec![0.25; len]);
            assert_eq!(conditioner.process(&block).len(), len);
        }
    }

    #[test]
    fn test_real_block_on_passthrough_is_widened() {
        let mut conditioner = Conditioner::for_format(SampleFormat::Complex, 64);
        let block = SampleBuf::Real(vec![1.0, -2.0]);
        assert_eq!(
            conditioner.process(&block),
            &[ComplexSample::new(1.0, 0.0), ComplexSample::new(-2.0, 0.0)]
        );
    }
}
