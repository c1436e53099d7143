//! Transmit hardware
//!
//! `HardwareSink` is everything the pipeline needs from a transmitter:
//! a capability query, three setters, and a streaming sink bracketed by
//! `activate` / `deactivate`.
//!
//! - SimulatedSink: no hardware, optional capture to a cf32 file
//! - SoapySink: SoapySDR devices (feature `soapy`)

pub mod sim;
#[cfg(feature = "soapy")]
pub mod soapy;

pub use sim::{SimulatedSink, SimulatedSinkConfig};
#[cfg(feature = "soapy")]
pub use soapy::SoapySink;

use thiserror::Error;

use crate::dsp::ComplexSample;

/// Sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open device: {0}")]
    Open(String),
    #[error("capability query failed: {0}")]
    Query(String),
    #[error("failed to {action}: {message}")]
    Config {
        action: &'static str,
        message: String,
    },
    #[error("transmit stream error: {0}")]
    Stream(String),
    #[error("transmit stream is not active")]
    NotActive,
    #[error("capture write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// What the transmitter can do, fixed for the lifetime of the device handle
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    /// DAC clock in Hz
    pub dac_rate: f64,
    /// Supported interpolation factors, ascending
    pub interpolations: Vec<u32>,
    /// Tunable center frequency range in Hz
    pub frequency_range: (f64, f64),
    /// Gain range in dB
    pub gain_range: (f64, f64),
}

impl Capabilities {
    pub fn contains_frequency(&self, frequency: f64) -> bool {
        let (min, max) = self.frequency_range;
        frequency >= min && frequency <= max
    }

    /// Gain used when none is requested
    pub fn gain_midpoint(&self) -> f64 {
        (self.gain_range.0 + self.gain_range.1) / 2.0
    }
}

/// A transmitter the pipeline can configure and stream to.
///
/// The pipeline arms the device from the constructing thread, then moves the
/// sink into its transmit thread, so implementations must be `Send`.
pub trait HardwareSink: Send {
    /// Human-readable device description
    fn describe(&self) -> String;

    fn capabilities(&self) -> Result<Capabilities, SinkError>;

    fn set_interpolation(&mut self, interpolation: u32) -> Result<(), SinkError>;

    /// Returns false when the device rejects the frequency; state is unchanged then.
    fn set_center_frequency(&mut self, frequency: f64) -> bool;

    fn set_gain(&mut self, gain: f64) -> Result<(), SinkError>;

    /// Acquire transmit resources
    fn activate(&mut self) -> Result<(), SinkError>;

    /// Transmit a block, blocking until the device took all of it
    fn accept(&mut self, samples: &[ComplexSample]) -> Result<(), SinkError>;

    /// Release transmit resources. Must be safe to call when not active.
    fn deactivate(&mut self);
}

/// Transmit resources held for the lifetime of the guard.
///
/// `deactivate` runs on drop, whichever way the transmit loop exits.
pub struct ActiveTransmit<'a> {
    sink: &'a mut dyn HardwareSink,
}

impl<'a> ActiveTransmit<'a> {
    pub fn acquire(sink: &'a mut dyn HardwareSink) -> Result<Self, SinkError> {
        sink.activate()?;
        log::info!("Transmit stream active: {}", sink.describe());
        Ok(Self { sink })
    }

    #[inline]
    pub fn accept(&mut self, samples: &[ComplexSample]) -> Result<(), SinkError> {
        self.sink.accept(samples)
    }
}

impl Drop for ActiveTransmit<'_> {
    fn drop(&mut self) {
        self.sink.deactivate();
        log::info!("Transmit stream released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_helpers() {
        let caps = Capabilities {
            dac_rate: 128e6,
            interpolations: vec![4, 8],
            frequency_range: (50e6, 2.2e9),
            gain_range: (-20.0, 10.0),
        };
        assert!(caps.contains_frequency(50e6));
        assert!(caps.contains_frequency(2.2e9));
        assert!(!caps.contains_frequency(2.3e9));
        assert_eq!(caps.gain_midpoint(), -5.0);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let mut sink = SimulatedSink::new(SimulatedSinkConfig::default());
        {
            let mut active = ActiveTransmit::acquire(&mut sink).unwrap();
            active.accept(&[ComplexSample::new(1.0, 0.0)]).unwrap();
        }
        assert!(!sink.is_active());
        assert_eq!(sink.samples_accepted(), 1);
        assert!(matches!(
            sink.accept(&[ComplexSample::default()]),
            Err(SinkError::NotActive)
        ));
    }
}
