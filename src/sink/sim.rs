//! Simulated transmitter
//!
//! Behaves like a fixed-interpolation transmitter without touching hardware.
//! Accepted samples can be captured to a little-endian cf32 file and the
//! stream can be paced to the configured output rate so a dry run takes as
//! long as the real transmission would.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use byteorder::{LittleEndian, WriteBytesExt};

use super::{Capabilities, HardwareSink, SinkError};
use crate::dsp::ComplexSample;
use crate::units::format_eng;

/// Capability profile and behaviour of the simulated device
#[derive(Debug, Clone)]
pub struct SimulatedSinkConfig {
    pub capabilities: Capabilities,
    /// Write every accepted sample here as interleaved little-endian f32
    pub capture: Option<PathBuf>,
    /// Sleep so samples are consumed at the output rate
    pub realtime: bool,
}

impl Default for SimulatedSinkConfig {
    fn default() -> Self {
        Self {
            // 128 MHz DAC, interpolation in steps of 4 up to 512
            capabilities: Capabilities {
                dac_rate: 128e6,
                interpolations: (4..=512).step_by(4).collect(),
                frequency_range: (50e6, 2.2e9),
                gain_range: (-20.0, 0.0),
            },
            capture: None,
            realtime: false,
        }
    }
}

pub struct SimulatedSink {
    config: SimulatedSinkConfig,
    interpolation: Option<u32>,
    center_frequency: Option<f64>,
    gain: Option<f64>,
    active: bool,
    capture: Option<BufWriter<File>>,
    samples_accepted: u64,
    /// Start of the current activation, for pacing
    started: Option<Instant>,
    paced_samples: u64,
}

impl SimulatedSink {
    pub fn new(config: SimulatedSinkConfig) -> Self {
        Self {
            config,
            interpolation: None,
            center_frequency: None,
            gain: None,
            active: false,
            capture: None,
            samples_accepted: 0,
            started: None,
            paced_samples: 0,
        }
    }

    pub fn interpolation(&self) -> Option<u32> {
        self.interpolation
    }

    pub fn center_frequency(&self) -> Option<f64> {
        self.center_frequency
    }

    pub fn gain(&self) -> Option<f64> {
        self.gain
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn samples_accepted(&self) -> u64 {
        self.samples_accepted
    }

    fn output_rate(&self) -> Option<f64> {
        self.interpolation
            .map(|interp| self.config.capabilities.dac_rate / interp as f64)
    }

    fn pace(&mut self, samples: usize) {
        let (Some(started), Some(rate)) = (self.started, self.output_rate()) else {
            return;
        };
        self.paced_samples += samples as u64;
        let due = Duration::from_secs_f64(self.paced_samples as f64 / rate);
        let elapsed = started.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }
    }
}

impl HardwareSink for SimulatedSink {
    fn describe(&self) -> String {
        let caps = &self.config.capabilities;
        format!(
            "simulated transmitter (DAC {}Hz, {} interpolation factors)",
            format_eng(caps.dac_rate),
            caps.interpolations.len()
        )
    }

    fn capabilities(&self) -> Result<Capabilities, SinkError> {
        Ok(self.config.capabilities.clone())
    }

    fn set_interpolation(&mut self, interpolation: u32) -> Result<(), SinkError> {
        if !self.config.capabilities.interpolations.contains(&interpolation) {
            return Err(SinkError::Config {
                action: "set interpolation",
                message: format!("{} is not a supported factor", interpolation),
            });
        }
        self.interpolation = Some(interpolation);
        Ok(())
    }

    fn set_center_frequency(&mut self, frequency: f64) -> bool {
        if !self.config.capabilities.contains_frequency(frequency) {
            return false;
        }
        self.center_frequency = Some(frequency);
        true
    }

    fn set_gain(&mut self, gain: f64) -> Result<(), SinkError> {
        let (min, max) = self.config.capabilities.gain_range;
        self.gain = Some(gain.clamp(min, max));
        Ok(())
    }

    fn activate(&mut self) -> Result<(), SinkError> {
        if let Some(path) = &self.config.capture {
            let file = File::create(path)?;
            self.capture = Some(BufWriter::new(file));
            log::info!("Capturing transmitted samples to {}", path.display());
        }
        self.active = true;
        self.started = self.config.realtime.then(Instant::now);
        self.paced_samples = 0;
        Ok(())
    }

    fn accept(&mut self, samples: &[ComplexSample]) -> Result<(), SinkError> {
        if !self.active {
            return Err(SinkError::NotActive);
        }
        if let Some(capture) = &mut self.capture {
            for s in samples {
                capture.write_f32::<LittleEndian>(s.re)?;
                capture.write_f32::<LittleEndian>(s.im)?;
            }
        }
        self.samples_accepted += samples.len() as u64;
        self.pace(samples.len());
        Ok(())
    }

    fn deactivate(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.flush() {
                log::warn!("Failed to flush capture file: {}", e);
            }
        }
        self.active = false;
        self.started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;

    #[test]
    fn test_rejects_out_of_range_frequency() {
        let mut sink = SimulatedSink::new(SimulatedSinkConfig::default());
        assert!(!sink.set_center_frequency(10e6));
        assert_eq!(sink.center_frequency(), None);
        assert!(sink.set_center_frequency(433.92e6));
        assert_eq!(sink.center_frequency(), Some(433.92e6));
    }

    #[test]
    fn test_unsupported_interpolation() {
        let mut sink = SimulatedSink::new(SimulatedSinkConfig::default());
        assert!(sink.set_interpolation(6).is_err());
        sink.set_interpolation(64).unwrap();
        assert_eq!(sink.interpolation(), Some(64));
    }

    #[test]
    fn test_capture_is_interleaved_le() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.cf32");
        let mut sink = SimulatedSink::new(SimulatedSinkConfig {
            capture: Some(path.clone()),
            ..Default::default()
        });

        sink.activate().unwrap();
        sink.accept(&[ComplexSample::new(0.5, -0.25), ComplexSample::new(1.0, 2.0)])
            .unwrap();
        sink.deactivate();

        let mut file = File::open(&path).unwrap();
        let mut values = [0f32; 4];
        file.read_f32_into::<LittleEndian>(&mut values).unwrap();
        assert_eq!(values, [0.5, -0.25, 1.0, 2.0]);
    }

    #[test]
    fn test_realtime_pacing() {
        let mut sink = SimulatedSink::new(SimulatedSinkConfig {
            realtime: true,
            ..Default::default()
        });
        // 128 MHz / 512 = 250 kHz; 25k samples take 100 ms
        sink.set_interpolation(512).unwrap();
        sink.activate().unwrap();
        let start = Instant::now();
        sink.accept(&vec![ComplexSample::default(); 25_000]).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(95));
        sink.deactivate();
    }
}
