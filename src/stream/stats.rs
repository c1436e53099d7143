//! Transmit statistics
//!
//! Counters are plain relaxed atomics: both worker threads bump them on the
//! hot path, the main thread only reads snapshots for status output.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by the source and transmit threads
#[derive(Debug, Default)]
pub struct TransmitStats {
    /// Samples pulled from the source
    samples_read: AtomicU64,
    /// Samples produced by the resampler
    samples_resampled: AtomicU64,
    /// Samples accepted by the hardware sink
    samples_sent: AtomicU64,
    /// Times the sink found the buffer empty while the source was still producing
    underrun_count: AtomicU64,
    /// Source restarts (looping)
    source_restarts: AtomicU64,
}

impl TransmitStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_samples_read(&self, samples: u64) {
        self.samples_read.fetch_add(samples, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_samples_resampled(&self, samples: u64) {
        self.samples_resampled.fetch_add(samples, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_samples_sent(&self, samples: u64) {
        self.samples_sent.fetch_add(samples, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_underrun(&self) {
        self.underrun_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_source_restarts(&self, restarts: u64) {
        self.source_restarts.store(restarts, Ordering::Relaxed);
    }

    pub fn samples_read(&self) -> u64 {
        self.samples_read.load(Ordering::Relaxed)
    }

    pub fn samples_resampled(&self) -> u64 {
        self.samples_resampled.load(Ordering::Relaxed)
    }

    pub fn samples_sent(&self) -> u64 {
        self.samples_sent.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }

    pub fn source_restarts(&self) -> u64 {
        self.source_restarts.load(Ordering::Relaxed)
    }

    /// Summary for the end of a run
    pub fn report(&self, input_rate: f64, output_rate: f64) -> StatsReport {
        StatsReport {
            samples_read: self.samples_read(),
            samples_resampled: self.samples_resampled(),
            samples_sent: self.samples_sent(),
            underrun_count: self.underrun_count(),
            source_restarts: self.source_restarts(),
            input_rate,
            output_rate,
        }
    }
}

/// End-of-run report
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub samples_read: u64,
    pub samples_resampled: u64,
    pub samples_sent: u64,
    pub underrun_count: u64,
    pub source_restarts: u64,
    pub input_rate: f64,
    pub output_rate: f64,
}

impl StatsReport {
    /// Output samples per input sample actually observed
    pub fn measured_ratio(&self) -> f64 {
        if self.samples_read == 0 {
            0.0
        } else {
            self.samples_resampled as f64 / self.samples_read as f64
        }
    }

    /// Seconds of signal the sink has been handed
    pub fn seconds_sent(&self) -> f64 {
        if self.output_rate > 0.0 {
            self.samples_sent as f64 / self.output_rate
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Transmit Statistics")?;
        writeln!(f, "===================")?;
        writeln!(f, "Samples read:      {}", self.samples_read)?;
        writeln!(f, "Samples resampled: {}", self.samples_resampled)?;
        writeln!(
            f,
            "Resampling ratio:  {:.6} measured / {:.6} planned",
            self.measured_ratio(),
            self.output_rate / self.input_rate
        )?;
        writeln!(
            f,
            "Samples sent:      {} ({:.2} s)",
            self.samples_sent,
            self.seconds_sent()
        )?;
        writeln!(f, "Source restarts:   {}", self.source_restarts)?;
        writeln!(f, "Underruns:         {}", self.underrun_count)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_report() {
        let stats = TransmitStats::new();
        stats.add_samples_read(1000);
        stats.add_samples_resampled(1562);
        stats.add_samples_sent(1500);
        stats.record_underrun();
        stats.set_source_restarts(2);

        let report = stats.report(1e6, 1.5625e6);
        assert_eq!(report.samples_read, 1000);
        assert_eq!(report.underrun_count, 1);
        assert_eq!(report.source_restarts, 2);
        assert!((report.measured_ratio() - 1.562).abs() < 1e-9);
        assert!((report.seconds_sent() - 1500.0 / 1.5625e6).abs() < 1e-12);
        assert!(report.to_string().contains("Underruns:         1"));
    }
}
