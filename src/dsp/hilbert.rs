//! Real to analytic signal conversion
//!
//! The imaginary part is the input run through a Hilbert FIR, the real part
//! is the input delayed by the same group delay so both rails line up.

use super::{firdes, ComplexSample, Sample};

/// Streaming Hilbert transform, 1:1 in sample count.
#[derive(Debug, Clone)]
pub struct HilbertTransform {
    taps: Vec<Sample>,
    /// Input history, newest sample at `write_idx`
    history: Vec<Sample>,
    write_idx: usize,
}

impl HilbertTransform {
    /// `num_taps` even values are rounded up to the next odd length.
    pub fn new(num_taps: usize) -> Self {
        let taps = firdes::hilbert(num_taps);
        let len = taps.len();
        Self {
            taps,
            history: vec![0.0; len],
            write_idx: 0,
        }
    }

    pub fn num_taps(&self) -> usize {
        self.taps.len()
    }

    /// Delay between input and output in samples
    pub fn group_delay(&self) -> usize {
        self.taps.len() / 2
    }

    #[inline]
    pub fn process_sample(&mut self, x: Sample) -> ComplexSample {
        let len = self.taps.len();
        self.history[self.write_idx] = x;

        // taps at even offsets from the center are zero, skip them
        let mut im = 0.0;
        for (k, &tap) in self.taps.iter().enumerate() {
            if tap != 0.0 {
                let idx = (self.write_idx + len - k) % len;
                im += tap * self.history[idx];
            }
        }

        let re = self.history[(self.write_idx + len - self.group_delay()) % len];
        self.write_idx = (self.write_idx + 1) % len;
        ComplexSample::new(re, im)
    }

    /// Convert a block, replacing the contents of `output`.
    pub fn process_into(&mut self, input: &[Sample], output: &mut Vec<ComplexSample>) {
        output.clear();
        output.reserve(input.len());
        for &x in input {
            let y = self.process_sample(x);
            output.push(y);
        }
    }

    pub fn process(&mut self, input: &[Sample]) -> Vec<ComplexSample> {
        let mut output = Vec::with_capacity(input.len());
        self.process_into(input, &mut output);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_length_and_delay() {
        let h = HilbertTransform::new(64);
        assert_eq!(h.num_taps(), 65);
        assert_eq!(h.group_delay(), 32);
    }

    #[test]
    fn test_real_rail_is_delayed_input() {
        let mut h = HilbertTransform::new(64);
        let input: Vec<f32> = (0..200).map(|i| (i as f32 * 0.37).sin()).collect();
        let output = h.process(&input);
        assert_eq!(output.len(), input.len());
        for n in 32..200 {
            assert_eq!(output[n].re, input[n - 32]);
        }
        for n in 0..32 {
            assert_eq!(output[n].re, 0.0);
        }
    }

    #[test]
    fn test_cosine_becomes_analytic() {
        // quarter of the sample rate sits mid-band for an odd-tap Hilbert
        let w = PI / 2.0;
        let mut h = HilbertTransform::new(64);
        let input: Vec<f32> = (0..400).map(|n| (w * n as f32).cos()).collect();
        let output = h.process(&input);

        for n in 100..400 {
            let t = (n - 32) as f32;
            assert!((output[n].re - (w * t).cos()).abs() < 1e-5);
            assert!(
                (output[n].im - (w * t).sin()).abs() < 0.05,
                "n={} im={} expected={}",
                n,
                output[n].im,
                (w * t).sin()
            );
        }
    }

    #[test]
    fn test_negative_frequencies_suppressed() {
        let w = 2.0 * PI * 0.2;
        let mut h = HilbertTransform::new(64);
        let input: Vec<f32> = (0..2000).map(|n| (w * n as f32).cos()).collect();
        let output = h.process(&input);

        // project the settled output onto e^{+jwn} and e^{-jwn}
        let (mut pos, mut neg) = (ComplexSample::new(0.0, 0.0), ComplexSample::new(0.0, 0.0));
        for (n, y) in output.iter().enumerate().skip(100) {
            let phase = w * n as f32;
            pos += y * ComplexSample::from_polar(1.0, -phase);
            neg += y * ComplexSample::from_polar(1.0, phase);
        }
        assert!(neg.norm() < pos.norm() * 0.05);
    }

    #[test]
    fn test_quadrature_for_every_center_parity() {
        // centers: 6 -> 3, 62 and 63 -> 31, 64 -> 32, 66 -> 33
        let w = PI / 2.0;
        for ntaps in [6, 62, 63, 64, 66] {
            let mut h = HilbertTransform::new(ntaps);
            let delay = h.group_delay();
            let input: Vec<f32> = (0..400).map(|n| (w * n as f32).cos()).collect();
            let output = h.process(&input);

            let mut im_energy = 0.0;
            for n in 100..400 {
                let t = (n - delay) as f32;
                im_energy += output[n].im * output[n].im;
                assert!(
                    (output[n].im - (w * t).sin()).abs() < 0.1,
                    "ntaps={} n={} im={} expected={}",
                    ntaps,
                    n,
                    output[n].im,
                    (w * t).sin()
                );
            }
            // half of the settled samples carry a unit sine
            assert!(im_energy > 100.0, "ntaps={} im_energy={}", ntaps, im_energy);
        }
    }

    #[test]
    fn test_block_split_matches_single_pass() {
        let input: Vec<f32> = (0..300).map(|i| ((i * 7) % 13) as f32 - 6.0).collect();
        let mut whole = HilbertTransform::new(64);
        let expected = whole.process(&input);

        let mut split = HilbertTransform::new(64);
        let mut got = split.process(&input[..123]);
        got.extend(split.process(&input[123..]));
        assert_eq!(got, expected);
    }
}
