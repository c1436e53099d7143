//! FIR filter design
//!
//! Windowed-sinc designs with a Hamming window. Tap count follows the
//! requested transition width the same way the classic `firdes` routines do:
//! `ntaps = attenuation * fs / (22 * transition)`, forced odd.

use std::f64::consts::PI;

use super::Sample;

/// Number of polyphase branches in the arbitrary resampler's filter bank
pub const DEFAULT_NUM_SUBFILTERS: usize = 32;

/// Stopband attenuation of the Hamming window in dB
const HAMMING_ATTENUATION_DB: f64 = 53.0;

/// Cutoff as a fraction of the input Nyquist frequency
const CUTOFF_FRACTION: f64 = 0.99;

/// Transition width as a fraction of the input Nyquist frequency
const TRANSITION_FRACTION: f64 = 0.1;

/// Parameters of the resampler prototype low-pass filter.
///
/// Derived only from the input sample rate. The filter is designed at
/// `num_subfilters * input_rate` because every branch of the bank
/// interpolates by `num_subfilters` before the fractional combiner runs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterSpec {
    pub num_subfilters: usize,
    pub input_rate: f64,
    pub cutoff_hz: f64,
    pub transition_hz: f64,
}

impl FilterSpec {
    pub fn for_input_rate(input_rate: f64, num_subfilters: usize) -> Self {
        let nyquist = input_rate / 2.0;
        Self {
            num_subfilters,
            input_rate,
            cutoff_hz: CUTOFF_FRACTION * nyquist,
            transition_hz: TRANSITION_FRACTION * nyquist,
        }
    }

    /// Rate the prototype is designed at
    pub fn design_rate(&self) -> f64 {
        self.num_subfilters as f64 * self.input_rate
    }

    /// DC gain of the prototype
    pub fn gain(&self) -> f64 {
        self.num_subfilters as f64
    }

    /// Number of prototype taps these parameters produce
    pub fn num_taps(&self) -> usize {
        compute_ntaps(self.design_rate(), self.transition_hz)
    }

    pub fn design(&self) -> Vec<Sample> {
        low_pass(
            self.gain(),
            self.design_rate(),
            self.cutoff_hz,
            self.transition_hz,
        )
    }
}

/// Prototype filter for the arbitrary resampler, sized for `num_subfilters` branches.
pub fn design_low_pass(input_rate: f64, num_subfilters: usize) -> Vec<Sample> {
    FilterSpec::for_input_rate(input_rate, num_subfilters).design()
}

/// Tap count needed for a Hamming design with the given transition width
pub fn compute_ntaps(sample_rate: f64, transition_width: f64) -> usize {
    let ntaps = (HAMMING_ATTENUATION_DB * sample_rate / (22.0 * transition_width)) as usize;
    let ntaps = ntaps.max(1);
    if ntaps % 2 == 0 {
        ntaps + 1
    } else {
        ntaps
    }
}

fn hamming(ntaps: usize) -> Vec<f64> {
    if ntaps == 1 {
        return vec![1.0];
    }
    let m = (ntaps - 1) as f64;
    (0..ntaps)
        .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f64 / m).cos())
        .collect()
}

/// Windowed-sinc low-pass, normalized to `gain` at DC.
pub fn low_pass(gain: f64, sample_rate: f64, cutoff: f64, transition_width: f64) -> Vec<Sample> {
    assert!(sample_rate > 0.0, "sample rate must be positive");
    assert!(
        cutoff > 0.0 && cutoff <= sample_rate / 2.0,
        "cutoff must be in (0, fs/2]"
    );
    assert!(transition_width > 0.0, "transition width must be positive");

    let ntaps = compute_ntaps(sample_rate, transition_width);
    let window = hamming(ntaps);
    let center = (ntaps / 2) as isize;
    let fw_t0 = 2.0 * PI * cutoff / sample_rate;

    let taps: Vec<f64> = window
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let n = i as isize - center;
            if n == 0 {
                fw_t0 / PI * w
            } else {
                (n as f64 * fw_t0).sin() / (n as f64 * PI) * w
            }
        })
        .collect();

    let dc: f64 = taps.iter().sum();
    let scale = gain / dc;
    taps.iter().map(|t| (t * scale) as Sample).collect()
}

/// Hamming-windowed Hilbert transformer.
///
/// The length is bumped to the next odd value so the group delay is a whole
/// number of samples. Even-offset taps (including the center) are zero.
pub fn hilbert(ntaps: usize) -> Vec<Sample> {
    let ntaps = if ntaps % 2 == 0 { ntaps + 1 } else { ntaps }.max(3);
    let window = hamming(ntaps);
    let center = (ntaps / 2) as isize;

    window
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let n = i as isize - center;
            if n % 2 == 0 {
                0.0
            } else {
                (2.0 / (PI * n as f64) * w) as Sample
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_spec_from_rate() {
        let spec = FilterSpec::for_input_rate(1e6, DEFAULT_NUM_SUBFILTERS);
        assert!((spec.cutoff_hz - 495_000.0).abs() < 1e-6);
        assert!((spec.transition_hz - 50_000.0).abs() < 1e-6);
        assert_eq!(spec.design_rate(), 32e6);
        assert_eq!(spec.gain(), 32.0);
    }

    #[test]
    fn test_cutoff_independent_of_subfilters() {
        let a = FilterSpec::for_input_rate(1e6, 8);
        let b = FilterSpec::for_input_rate(1e6, 64);
        assert_eq!(a.cutoff_hz, b.cutoff_hz);
        assert_eq!(a.transition_hz, b.transition_hz);
        assert_ne!(a.gain(), b.gain());
    }

    #[test]
    fn test_ntaps_odd_and_sized_by_transition() {
        // 53 * 32e6 / (22 * 50e3) = 1541.8
        assert_eq!(compute_ntaps(32e6, 50e3), 1541);
        // even results are bumped
        assert_eq!(compute_ntaps(22.0, 53.0), 1);
        assert_eq!(compute_ntaps(44.0, 53.0), 3);
    }

    #[test]
    fn test_prototype_gain_is_num_subfilters() {
        let taps = design_low_pass(1e6, 32);
        assert_eq!(taps.len(), 1541);
        let dc: f64 = taps.iter().map(|&t| t as f64).sum();
        assert!((dc - 32.0).abs() < 1e-3, "dc gain {}", dc);
    }

    #[test]
    fn test_prototype_symmetric() {
        let taps = design_low_pass(250e3, 32);
        let n = taps.len();
        for i in 0..n / 2 {
            assert!((taps[i] - taps[n - 1 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_low_pass_rejects_stopband() {
        let fs = 48_000.0;
        let taps = low_pass(1.0, fs, 4_000.0, 1_000.0);
        let response = |f: f64| -> f64 {
            let w = 2.0 * PI * f / fs;
            let (mut re, mut im) = (0.0, 0.0);
            for (n, &t) in taps.iter().enumerate() {
                re += t as f64 * (w * n as f64).cos();
                im -= t as f64 * (w * n as f64).sin();
            }
            (re * re + im * im).sqrt()
        };
        assert!((response(1_000.0) - 1.0).abs() < 0.01);
        assert!(response(8_000.0) < 0.01);
    }

    #[test]
    fn test_hilbert_taps() {
        let taps = hilbert(64);
        assert_eq!(taps.len(), 65);
        assert_eq!(taps[32], 0.0);
        // odd symmetry around the center, zero at even offsets
        for k in 1..=32 {
            assert!((taps[32 + k] + taps[32 - k]).abs() < 1e-7);
            if k % 2 == 0 {
                assert_eq!(taps[32 + k], 0.0);
            }
        }
        assert!(taps[33] > 0.0);
    }
}
