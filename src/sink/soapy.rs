//! SoapySDR transmit sink
//! (requires the `soapy` feature)
//!
//! SoapySDR exposes sample rates rather than interpolation factors. The
//! master clock is taken as the DAC rate and every integer divisor whose
//! quotient falls inside the device's TX sample rate ranges is offered as an
//! interpolation factor.

use soapysdr::{Args, Device, Direction, TxStream};

use super::{Capabilities, HardwareSink, SinkError};
use crate::dsp::ComplexSample;

/// Largest divisor probed when deriving interpolation factors
const MAX_INTERPOLATION: u32 = 1024;

/// Microseconds to wait for the device to take a block
const WRITE_TIMEOUT_US: i64 = 100_000;

/// Convert command line device arguments ("key=value,key=value") to Args
fn convert_args(args: &str) -> Args {
    let mut converted = Args::new();
    for pair in args.split(',').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) => converted.set(key.trim(), value.trim()),
            None => converted.set(pair.trim(), ""),
        }
    }
    converted
}

pub struct SoapySink {
    dev: Device,
    channel: usize,
    args: String,
    /// Present between activate and deactivate
    tx: Option<TxStream<ComplexSample>>,
}

impl SoapySink {
    pub fn open(args: &str, channel: usize) -> Result<Self, SinkError> {
        let dev = Device::new(convert_args(args)).map_err(|e| SinkError::Open(e.to_string()))?;

        let channels = dev
            .num_channels(Direction::Tx)
            .map_err(|e| SinkError::Query(e.to_string()))?;
        if channel >= channels {
            return Err(SinkError::Open(format!(
                "device has {} TX channels, channel {} requested",
                channels, channel
            )));
        }

        Ok(Self {
            dev,
            channel,
            args: args.to_string(),
            tx: None,
        })
    }

    fn dac_rate(&self) -> Result<f64, SinkError> {
        let clock = self
            .dev
            .get_master_clock_rate()
            .map_err(|e| SinkError::Query(e.to_string()))?;
        if clock > 0.0 {
            return Ok(clock);
        }
        // No master clock exposed: fall back to the highest TX rate
        let ranges = self
            .dev
            .get_sample_rate_range(Direction::Tx, self.channel)
            .map_err(|e| SinkError::Query(e.to_string()))?;
        ranges
            .iter()
            .map(|r| r.maximum)
            .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
            .ok_or_else(|| SinkError::Query("device reports no TX sample rates".into()))
    }
}

impl HardwareSink for SoapySink {
    fn describe(&self) -> String {
        let driver = self.dev.driver_key().unwrap_or_default();
        let hardware = self.dev.hardware_key().unwrap_or_default();
        format!(
            "SoapySDR {} {} (args \"{}\", TX channel {})",
            driver, hardware, self.args, self.channel
        )
    }

    fn capabilities(&self) -> Result<Capabilities, SinkError> {
        let query = |e: soapysdr::Error| SinkError::Query(e.to_string());

        let dac_rate = self.dac_rate()?;
        let rates = self
            .dev
            .get_sample_rate_range(Direction::Tx, self.channel)
            .map_err(query)?;
        let interpolations: Vec<u32> = (1..=MAX_INTERPOLATION)
            .filter(|&n| {
                let rate = dac_rate / n as f64;
                rates
                    .iter()
                    .any(|r| rate >= r.minimum && rate <= r.maximum)
            })
            .collect();

        let freqs = self
            .dev
            .frequency_range(Direction::Tx, self.channel)
            .map_err(query)?;
        let frequency_range = freqs.iter().fold((f64::MAX, f64::MIN), |(lo, hi), r| {
            (lo.min(r.minimum), hi.max(r.maximum))
        });
        if freqs.is_empty() {
            return Err(SinkError::Query("device reports no TX frequency range".into()));
        }

        let gain = self
            .dev
            .gain_range(Direction::Tx, self.channel)
            .map_err(query)?;

        Ok(Capabilities {
            dac_rate,
            interpolations,
            frequency_range,
            gain_range: (gain.minimum, gain.maximum),
        })
    }

    fn set_interpolation(&mut self, interpolation: u32) -> Result<(), SinkError> {
        let rate = self.dac_rate()? / interpolation as f64;
        self.dev
            .set_sample_rate(Direction::Tx, self.channel, rate)
            .map_err(|e| SinkError::Config {
                action: "set TX sample rate",
                message: e.to_string(),
            })
    }

    fn set_center_frequency(&mut self, frequency: f64) -> bool {
        match self
            .dev
            .set_frequency(Direction::Tx, self.channel, frequency, Args::new())
        {
            Ok(()) => true,
            Err(e) => {
                log::warn!("SoapySDR rejected center frequency {} Hz: {}", frequency, e);
                false
            }
        }
    }

    fn set_gain(&mut self, gain: f64) -> Result<(), SinkError> {
        self.dev
            .set_gain(Direction::Tx, self.channel, gain)
            .map_err(|e| SinkError::Config {
                action: "set TX gain",
                message: e.to_string(),
            })
    }

    fn activate(&mut self) -> Result<(), SinkError> {
        let stream = |action: &'static str| {
            move |e: soapysdr::Error| SinkError::Stream(format!("{}: {}", action, e))
        };
        let mut tx = self
            .dev
            .tx_stream::<ComplexSample>(&[self.channel])
            .map_err(stream("setup TX stream"))?;
        tx.activate(None).map_err(stream("activate TX stream"))?;
        self.tx = Some(tx);
        Ok(())
    }

    fn accept(&mut self, samples: &[ComplexSample]) -> Result<(), SinkError> {
        let tx = self.tx.as_mut().ok_or(SinkError::NotActive)?;
        tx.write_all(&[samples], None, false, WRITE_TIMEOUT_US)
            .map_err(|e| SinkError::Stream(e.to_string()))
    }

    fn deactivate(&mut self) {
        if let Some(mut tx) = self.tx.take() {
            if let Err(e) = tx.deactivate(None) {
                log::warn!("SoapySDR: failed to deactivate TX stream: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_args() {
        let args = convert_args("driver=uhd,serial=1234");
        assert_eq!(args.get("driver"), Some("uhd"));
        assert_eq!(args.get("serial"), Some("1234"));
        assert!(convert_args("").get("driver").is_none());
    }
}
