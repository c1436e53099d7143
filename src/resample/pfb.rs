//! Polyphase filter bank arbitrary resampler
//!
//! The prototype low-pass is split into `num_filters` branches, each one a
//! phase of an interpolate-by-`num_filters` filter. Per output sample the
//! phase index advances by `num_filters / ratio`; the integer part selects a
//! branch, the fractional part interpolates linearly towards the next branch
//! using a derivative filter bank. When the index wraps past the last
//! branch the next input sample is consumed.

use super::Resampler;
use crate::dsp::{ComplexSample, Sample};

/// Arbitrary-ratio resampler for complex streams
#[derive(Debug, Clone)]
pub struct PfbArbResampler {
    ratio: f64,
    num_filters: usize,
    taps_per_filter: usize,
    /// `filters[k][t] = prototype[t * num_filters + k]`
    filters: Vec<Vec<Sample>>,
    /// Same split of the first difference of the prototype
    diff_filters: Vec<Vec<Sample>>,
    prototype_len: usize,
    /// Whole branches skipped per output
    dec_rate: usize,
    /// Fractional branch advance per output
    flt_rate: f64,
    /// Fractional phase accumulator in [0, 1)
    acc: f64,
    /// Branch to resume with
    last_filter: usize,
    /// Input samples already stepped past at the end of the last block
    skip: usize,
    /// Last `taps_per_filter - 1` inputs
    history: Vec<ComplexSample>,
    work: Vec<ComplexSample>,
}

impl PfbArbResampler {
    /// `taps` is the prototype designed at `num_filters` times the input rate
    /// with a DC gain of `num_filters`.
    pub fn new(ratio: f64, taps: &[Sample], num_filters: usize) -> Self {
        assert!(ratio.is_finite() && ratio > 0.0, "ratio must be positive");
        assert!(num_filters > 0, "need at least one filter");
        assert!(!taps.is_empty(), "need at least one tap");

        let taps_per_filter = (taps.len() + num_filters - 1) / num_filters;
        let padded_len = taps_per_filter * num_filters;

        let mut padded = taps.to_vec();
        padded.resize(padded_len, 0.0);

        let mut diff = vec![0.0; padded_len];
        for i in 0..padded_len - 1 {
            diff[i] = padded[i + 1] - padded[i];
        }

        let split = |proto: &[Sample]| -> Vec<Vec<Sample>> {
            (0..num_filters)
                .map(|k| {
                    (0..taps_per_filter)
                        .map(|t| proto[t * num_filters + k])
                        .collect()
                })
                .collect()
        };

        let step = num_filters as f64 / ratio;
        let dec_rate = step.floor() as usize;

        log::debug!(
            "PFB resampler: ratio {:.6} | {} filters x {} taps | step {:.4}",
            ratio,
            num_filters,
            taps_per_filter,
            step
        );

        Self {
            ratio,
            num_filters,
            taps_per_filter,
            filters: split(&padded),
            diff_filters: split(&diff),
            prototype_len: taps.len(),
            dec_rate,
            flt_rate: step - dec_rate as f64,
            acc: 0.0,
            last_filter: 0,
            skip: 0,
            history: vec![ComplexSample::default(); taps_per_filter - 1],
            work: Vec::new(),
        }
    }

    pub fn taps_per_filter(&self) -> usize {
        self.taps_per_filter
    }

    /// Branch filter applied with its newest tap at `work[newest]`
    #[inline]
    fn dot(taps: &[Sample], work: &[ComplexSample], newest: usize) -> ComplexSample {
        let window = &work[newest + 1 - taps.len()..=newest];
        taps.iter()
            .zip(window.iter().rev())
            .fold(ComplexSample::default(), |sum, (&t, &x)| sum + x * t)
    }
}

impl Resampler for PfbArbResampler {
    fn process(&mut self, input: &[ComplexSample], output: &mut Vec<ComplexSample>) -> usize {
        let start_len = output.len();
        let n = input.len();
        let h = self.history.len();

        self.work.clear();
        self.work.extend_from_slice(&self.history);
        self.work.extend_from_slice(input);

        let mut i = self.skip;
        let mut j = self.last_filter;
        while i < n {
            while j < self.num_filters {
                let o0 = Self::dot(&self.filters[j], &self.work, i + h);
                let o1 = Self::dot(&self.diff_filters[j], &self.work, i + h);
                output.push(o0 + o1 * self.acc as Sample);

                self.acc += self.flt_rate;
                j += self.dec_rate + self.acc.floor() as usize;
                self.acc = self.acc.fract();
            }
            i += j / self.num_filters;
            j %= self.num_filters;
        }

        self.skip = i - n;
        self.last_filter = j;

        let tail = self.work.len() - h;
        self.history.copy_from_slice(&self.work[tail..]);

        output.len() - start_len
    }

    fn ratio(&self) -> f64 {
        self.ratio
    }

    fn group_delay(&self) -> f64 {
        (self.prototype_len - 1) as f64 / (2.0 * self.num_filters as f64)
    }

    fn reset(&mut self) {
        self.history
            .iter_mut()
            .for_each(|x| *x = ComplexSample::default());
        self.acc = 0.0;
        self.last_filter = 0;
        self.skip = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::firdes;
    use rand::Rng;

    fn tone(len: usize, w: f32) -> Vec<ComplexSample> {
        (0..len)
            .map(|n| ComplexSample::from_polar(1.0, w * n as f32))
            .collect()
    }

    #[test]
    fn test_branch_split() {
        let taps: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let r = PfbArbResampler::new(1.0, &taps, 4);
        assert_eq!(r.taps_per_filter(), 3);
        assert_eq!(r.filters[0], vec![0.0, 4.0, 8.0]);
        assert_eq!(r.filters[1], vec![1.0, 5.0, 9.0]);
        // zero padded
        assert_eq!(r.filters[3], vec![3.0, 7.0, 0.0]);
        assert_eq!(r.diff_filters[1], vec![1.0, 1.0, -9.0]);
    }

    #[test]
    fn test_unit_prototype_is_identity() {
        let mut rng = rand::thread_rng();
        let input: Vec<ComplexSample> = (0..500)
            .map(|_| ComplexSample::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect();

        let mut r = PfbArbResampler::new(1.0, &[1.0], 1);
        let mut output = Vec::new();
        assert_eq!(r.process(&input, &mut output), input.len());
        assert_eq!(output, input);
        assert_eq!(r.group_delay(), 0.0);
    }

    #[test]
    fn test_unity_ratio_reproduces_tone_after_delay() {
        let taps = firdes::design_low_pass(1e6, 32);
        let mut r = PfbArbResampler::new(1.0, &taps, 32);
        let w = 0.2f32;
        let input = tone(2000, w);
        let mut output = Vec::new();
        r.process(&input, &mut output);
        assert_eq!(output.len(), input.len());

        let delay = r.group_delay() as f32;
        assert!((delay - 24.0625).abs() < 1e-6);
        for n in 100..2000 {
            let expected = ComplexSample::from_polar(1.0, w * (n as f32 - delay));
            assert!(
                (output[n] - expected).norm() < 0.01,
                "n={} got={} expected={}",
                n,
                output[n],
                expected
            );
        }
    }

    #[test]
    fn test_output_count_follows_ratio() {
        let taps = firdes::design_low_pass(1e6, 32);
        for ratio in [1.5625, 2.0, 1.0 / 3.0, 0.75] {
            let mut r = PfbArbResampler::new(ratio, &taps, 32);
            let mut output = Vec::new();
            let mut produced = 0;
            for block in tone(10_000, 0.1).chunks(1000) {
                produced += r.process(block, &mut output);
            }
            let expected = 10_000.0 * ratio;
            assert_eq!(produced, output.len());
            assert!(
                (produced as f64 - expected).abs() <= 2.0,
                "ratio {} produced {} expected {}",
                ratio,
                produced,
                expected
            );
        }
    }

    #[test]
    fn test_upsampled_tone_keeps_amplitude_and_frequency() {
        let ratio = 1.5625;
        let taps = firdes::design_low_pass(1e6, 32);
        let mut r = PfbArbResampler::new(ratio, &taps, 32);
        let w = 0.3f32;
        let mut output = Vec::new();
        r.process(&tone(4000, w), &mut output);

        let settled = &output[200..output.len() - 10];
        for y in settled {
            assert!((y.norm() - 1.0).abs() < 0.02, "magnitude {}", y.norm());
        }
        // phase advance per output sample is w / ratio
        let expected = w / ratio as f32;
        for pair in settled.windows(2) {
            let step = (pair[1] * pair[0].conj()).arg();
            assert!((step - expected).abs() < 0.01, "step {}", step);
        }
    }

    #[test]
    fn test_block_boundaries_do_not_matter() {
        let taps = firdes::design_low_pass(250e3, 32);
        let input = tone(3000, 0.7);

        let mut whole = PfbArbResampler::new(1.37, &taps, 32);
        let mut expected = Vec::new();
        whole.process(&input, &mut expected);

        let mut split = PfbArbResampler::new(1.37, &taps, 32);
        let mut got = Vec::new();
        for block in input.chunks(333) {
            split.process(block, &mut got);
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn test_reset_restarts_phase() {
        let taps = firdes::design_low_pass(1e6, 32);
        let input = tone(500, 0.1);
        let mut r = PfbArbResampler::new(1.5625, &taps, 32);

        let mut first = Vec::new();
        r.process(&input, &mut first);
        r.reset();
        let mut second = Vec::new();
        r.process(&input, &mut second);
        assert_eq!(first, second);
    }
}
