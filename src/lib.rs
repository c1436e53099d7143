//! IQ Player Library
//!
//! Streams raw baseband sample files to an SDR transmitter at a rate its
//! fixed interpolator can produce, resampling the remainder in software.

pub mod dsp;
pub mod engine;
pub mod resample;
pub mod sink;
pub mod source;
pub mod stream;
pub mod units;

pub use engine::{PipelineConfig, PipelineError, StopReason, TransmitParameters, TransmitPipeline};
