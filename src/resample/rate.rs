//! Interpolation factor selection
//!
//! The transmitter only multiplies the sample rate by one of a few integer
//! factors. Pick the largest factor that does not exceed the ideal
//! `dac_rate / input_rate`, then leave the remaining fractional ratio to the
//! software resampler. Never round up: that would ask the hardware for more
//! interpolation than the stream can supply.

use thiserror::Error;

/// Residual ratios above this still work but waste resampler effort
pub const MAX_RESIDUAL_RATIO: f64 = 2.0;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RateError {
    #[error(
        "no supported interpolation factor fits: ideal interpolation is {ideal:.4} \
         (DAC rate / input rate), supported factors are {supported:?}"
    )]
    NoFeasibleRate { ideal: f64, supported: Vec<u32> },
    #[error("invalid sample rate {0}, must be positive and finite")]
    InvalidRate(f64),
}

/// How the file rate is brought to a rate the hardware produces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResamplingPlan {
    pub input_rate: f64,
    pub dac_rate: f64,
    /// Continuous interpolation that would be needed
    pub ideal_interpolation: f64,
    /// Factor programmed into the hardware
    pub interpolation: u32,
    /// `dac_rate / interpolation`
    pub output_rate: f64,
    /// `output_rate / input_rate`, realized by the software resampler
    pub residual_ratio: f64,
}

impl ResamplingPlan {
    pub fn select(dac_rate: f64, input_rate: f64, supported: &[u32]) -> Result<Self, RateError> {
        for rate in [dac_rate, input_rate] {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(RateError::InvalidRate(rate));
            }
        }

        let ideal = dac_rate / input_rate;
        let interpolation = supported
            .iter()
            .copied()
            .filter(|&x| x > 0 && x as f64 <= ideal)
            .max()
            .ok_or_else(|| {
                let mut supported = supported.to_vec();
                supported.sort_unstable();
                supported.dedup();
                RateError::NoFeasibleRate { ideal, supported }
            })?;

        let output_rate = dac_rate / interpolation as f64;
        let plan = Self {
            input_rate,
            dac_rate,
            ideal_interpolation: ideal,
            interpolation,
            output_rate,
            residual_ratio: output_rate / input_rate,
        };

        log::debug!(
            "Rate plan: ideal interp {:.4} -> {} | output {} Hz | residual {:.6}",
            ideal,
            interpolation,
            output_rate,
            plan.residual_ratio
        );
        Ok(plan)
    }

    /// Residual ratio far enough from 1 that a denser factor set or another
    /// input rate would serve better
    pub fn is_residual_excessive(&self) -> bool {
        self.residual_ratio > MAX_RESIDUAL_RATIO
    }
}
