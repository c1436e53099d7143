//! Transmit pipeline
//!
//! Wires source, conditioning, resampling and the hardware sink together.
//! The source thread and the transmit thread are fully decoupled and only
//! share a lock-free ring buffer plus atomic counters and flags.
//!
//! ```text
//! Source -> Conditioner -> Resampler -> RingBuffer -> HardwareSink
//! \______________ source thread ____/              \_ transmit thread
//! ```
//!
//! The rate plan and the prototype filter are computed once in `new` and
//! never change afterwards. Looping is handled by the source and is
//! invisible downstream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use thiserror::Error;

use crate::dsp::firdes::{FilterSpec, DEFAULT_NUM_SUBFILTERS};
use crate::dsp::{ComplexSample, Conditioner};
use crate::resample::rate::{RateError, ResamplingPlan};
use crate::resample::{PfbArbResampler, Resampler};
use crate::sink::{ActiveTransmit, HardwareSink, SinkError};
use crate::source::{SampleBuf, SampleFormat, SampleSource, SourceError};
use crate::stream::{RingBuffer, StatsReport, TransmitStats};
use crate::units::format_eng;

/// Pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Validating parameters and arming the hardware
    Constructing,
    /// Hardware armed, threads not started
    Ready,
    /// Worker threads running
    Running,
    Stopped,
    /// A runtime source or sink error ended the run
    Failed,
}

/// Why a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Non-looping source ran out and everything buffered was transmitted
    SourceExhausted,
    /// `stop()` was called while the pipeline was still transmitting
    InterruptRequested,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(
        "failed to set interpolation rate: ideal interpolation is {ideal:.4} \
         (DAC rate / input rate), supported factors are {supported:?}"
    )]
    NoFeasibleRate { ideal: f64, supported: Vec<u32> },
    #[error(
        "failed to set frequency {frequency} Hz, transmitter range is {} - {} Hz",
        .range.0,
        .range.1
    )]
    FrequencyRejected { frequency: f64, range: (f64, f64) },
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("invalid sample rate {0}, must be positive and finite")]
    InvalidRate(f64),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("failed to spawn worker thread: {0}")]
    Thread(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl From<RateError> for PipelineError {
    fn from(e: RateError) -> Self {
        match e {
            RateError::NoFeasibleRate { ideal, supported } => {
                Self::NoFeasibleRate { ideal, supported }
            }
            RateError::InvalidRate(rate) => Self::InvalidRate(rate),
        }
    }
}

/// User-facing transmit settings, validated once in `TransmitPipeline::new`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransmitParameters {
    /// Required
    pub center_frequency: Option<f64>,
    /// dB, defaults to the midpoint of the transmitter's gain range
    pub gain: Option<f64>,
    /// Restart the source at end of data
    pub loop_source: bool,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Sample rate of the source in Hz, required
    pub input_rate: Option<f64>,
    /// Sample format the source must produce
    pub format: SampleFormat,
    pub params: TransmitParameters,
    /// Branches in the polyphase resampler
    pub num_subfilters: usize,
    /// Hilbert filter length for real sources (even lengths grow by one)
    pub hilbert_taps: usize,
    /// Samples read from the source per iteration
    pub block_size: usize,
    /// Ring buffer size in output samples (rounded up to a power of two)
    pub buffer_samples: usize,
    /// Fill ratio (0.0-1.0) reached before transmission starts
    pub prebuffer_ratio: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_rate: None,
            format: SampleFormat::Complex,
            params: TransmitParameters::default(),
            num_subfilters: DEFAULT_NUM_SUBFILTERS,
            hilbert_taps: 64,
            block_size: 8192,
            // 2^20 samples, ~0.5 s at 2 MS/s
            buffer_samples: 1 << 20,
            prebuffer_ratio: 0.5,
        }
    }
}

impl PipelineConfig {
    /// Reject sizes the worker threads cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.num_subfilters == 0 {
            return Err(PipelineError::InvalidConfig("num_subfilters must be at least 1"));
        }
        if self.block_size == 0 {
            return Err(PipelineError::InvalidConfig("block_size must be at least 1"));
        }
        if self.buffer_samples == 0 {
            return Err(PipelineError::InvalidConfig("buffer_samples must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.prebuffer_ratio) {
            return Err(PipelineError::InvalidConfig("prebuffer_ratio must be within 0.0-1.0"));
        }
        Ok(())
    }
}

/// Snapshot for status output
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub buffer_fill_ratio: f64,
    pub samples_read: u64,
    pub samples_sent: u64,
    pub underrun_count: u64,
    pub source_restarts: u64,
    /// Seconds of signal handed to the transmitter
    pub seconds_sent: f64,
    /// Wall time since `start()`
    pub elapsed: Duration,
}

/// Flags shared by the worker threads
///
/// Atomics only, no locks on the sample path.
struct SharedState {
    /// Cleared to ask both threads to exit
    running: AtomicBool,
    /// Source thread has pushed its last sample
    source_done: AtomicBool,
    /// Set by `stop()` while the transmit thread was still active
    interrupted: AtomicBool,
}

/// Everything the source thread owns
struct SourceStage {
    source: Box<dyn SampleSource>,
    conditioner: Conditioner,
    resampler: Box<dyn Resampler>,
}

type TransmitResult = (Box<dyn HardwareSink>, Result<(), PipelineError>);

pub struct TransmitPipeline {
    config: PipelineConfig,
    state: PipelineState,
    plan: ResamplingPlan,
    filter_spec: FilterSpec,
    ring_buffer: Arc<RingBuffer<ComplexSample>>,
    stats: Arc<TransmitStats>,
    shared: Arc<SharedState>,
    stage: Option<SourceStage>,
    sink: Option<Box<dyn HardwareSink>>,
    source_thread: Option<JoinHandle<Result<(), PipelineError>>>,
    transmit_thread: Option<JoinHandle<TransmitResult>>,
    started_at: Option<Instant>,
}

impl TransmitPipeline {
    /// Validate parameters, plan the rate conversion and arm the hardware.
    ///
    /// Nothing on the sink is changed unless the rate plan is feasible and
    /// the frequency lies in the reported range. The frequency is set first
    /// so a rejection by the device leaves interpolation and gain untouched.
    ///
    /// Arming is not rolled back: if `set_interpolation` or `set_gain` fails
    /// after the frequency was accepted, the device stays tuned to it.
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn SampleSource>,
        mut sink: Box<dyn HardwareSink>,
    ) -> Result<Self, PipelineError> {
        let mut state = PipelineState::Constructing;
        log::debug!("Pipeline state: {:?}", state);

        let frequency = config
            .params
            .center_frequency
            .ok_or(PipelineError::MissingParameter("center frequency"))?;
        let input_rate = config
            .input_rate
            .ok_or(PipelineError::MissingParameter("input sample rate"))?;
        config.validate()?;
        if source.format() != config.format {
            return Err(PipelineError::InvalidState(
                "source sample format does not match configuration",
            ));
        }

        let caps = sink.capabilities()?;
        log::info!("Using {}", sink.describe());
        log::info!(
            "Possible tx frequency range: {} - {}",
            format_eng(caps.frequency_range.0),
            format_eng(caps.frequency_range.1)
        );

        let plan = ResamplingPlan::select(caps.dac_rate, input_rate, &caps.interpolations)?;
        log::info!(
            "Interpolation {} (ideal {:.3}) | output rate {}S/s | resampling ratio {:.6}",
            plan.interpolation,
            plan.ideal_interpolation,
            format_eng(plan.output_rate),
            plan.residual_ratio
        );
        if plan.is_residual_excessive() {
            log::warn!(
                "Resampling ratio {:.3} is large; a transmitter with finer interpolation \
                 steps or an input rate closer to {}S/s would need less software resampling",
                plan.residual_ratio,
                format_eng(plan.output_rate)
            );
        }

        let filter_spec = FilterSpec::for_input_rate(input_rate, config.num_subfilters);
        let taps = filter_spec.design();
        log::info!(
            "Resampler filter: {} taps, {} subfilters, cutoff {}Hz, transition {}Hz",
            taps.len(),
            filter_spec.num_subfilters,
            format_eng(filter_spec.cutoff_hz),
            format_eng(filter_spec.transition_hz)
        );

        if !caps.contains_frequency(frequency) {
            return Err(PipelineError::FrequencyRejected {
                frequency,
                range: caps.frequency_range,
            });
        }

        // arm the hardware
        if !sink.set_center_frequency(frequency) {
            return Err(PipelineError::FrequencyRejected {
                frequency,
                range: caps.frequency_range,
            });
        }
        sink.set_interpolation(plan.interpolation)?;
        let gain = config.params.gain.unwrap_or_else(|| caps.gain_midpoint());
        sink.set_gain(gain)?;
        log::info!(
            "Center frequency {}Hz | gain {:.1} dB{}",
            format_eng(frequency),
            gain,
            if config.params.gain.is_none() { " (midpoint)" } else { "" }
        );

        let conditioner = Conditioner::for_format(config.format, config.hilbert_taps);
        if conditioner.is_analytic() {
            log::info!(
                "Real source: Hilbert transform, {} samples group delay",
                conditioner.group_delay()
            );
        }
        let pfb = PfbArbResampler::new(plan.residual_ratio, &taps, config.num_subfilters);
        log::debug!(
            "Resampler: {} taps per subfilter, group delay {:.4} input samples",
            pfb.taps_per_filter(),
            pfb.group_delay()
        );
        let resampler: Box<dyn Resampler> = Box::new(pfb);

        let ring_buffer = Arc::new(RingBuffer::with_min_capacity(config.buffer_samples));

        state = PipelineState::Ready;
        log::debug!("Pipeline state: {:?}", state);

        Ok(Self {
            config,
            state,
            plan,
            filter_spec,
            ring_buffer,
            stats: Arc::new(TransmitStats::new()),
            shared: Arc::new(SharedState {
                running: AtomicBool::new(false),
                source_done: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
            }),
            stage: Some(SourceStage {
                source,
                conditioner,
                resampler,
            }),
            sink: Some(sink),
            source_thread: None,
            transmit_thread: None,
            started_at: None,
        })
    }

    /// Spawn the source and transmit threads.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Ready {
            return Err(PipelineError::InvalidState("pipeline can only start once, from Ready"));
        }
        let (Some(stage), Some(sink)) = (self.stage.take(), self.sink.take()) else {
            return Err(PipelineError::InvalidState("pipeline stages missing"));
        };

        self.ring_buffer.lock_memory();
        self.shared.running.store(true, Ordering::Release);

        let source_thread = {
            let ring_buffer = Arc::clone(&self.ring_buffer);
            let stats = Arc::clone(&self.stats);
            let shared = Arc::clone(&self.shared);
            let block_size = self.config.block_size;
            let output_rate = self.plan.output_rate;
            thread::Builder::new()
                .name("source".to_string())
                .spawn(move || {
                    Self::source_thread_main(stage, ring_buffer, stats, shared, block_size, output_rate)
                })?
        };

        let transmit_thread = {
            let ring_buffer = Arc::clone(&self.ring_buffer);
            let stats = Arc::clone(&self.stats);
            let shared = Arc::clone(&self.shared);
            let block_size = self.config.block_size;
            let prebuffer_ratio = self.config.prebuffer_ratio;
            let spawned = thread::Builder::new()
                .name("transmit".to_string())
                .spawn(move || {
                    Self::transmit_thread_main(
                        sink,
                        ring_buffer,
                        stats,
                        shared,
                        block_size,
                        prebuffer_ratio,
                    )
                });
            match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    self.shared.running.store(false, Ordering::Release);
                    let _ = source_thread.join();
                    self.state = PipelineState::Failed;
                    return Err(e.into());
                }
            }
        };

        self.source_thread = Some(source_thread);
        self.transmit_thread = Some(transmit_thread);
        self.started_at = Some(Instant::now());
        self.state = PipelineState::Running;
        log::info!("Transmit pipeline started");
        Ok(())
    }

    /// Source thread: read, condition, resample, push.
    fn source_thread_main(
        mut stage: SourceStage,
        ring_buffer: Arc<RingBuffer<ComplexSample>>,
        stats: Arc<TransmitStats>,
        shared: Arc<SharedState>,
        block_size: usize,
        output_rate: f64,
    ) -> Result<(), PipelineError> {
        log::info!(
            "Source thread started, {} samples per block, ring buffer {} samples",
            block_size,
            ring_buffer.capacity()
        );

        let result = Self::produce(&mut stage, &ring_buffer, &stats, &shared, block_size, output_rate);
        if let Err(e) = &result {
            log::error!("Source thread failed: {}", e);
            shared.running.store(false, Ordering::Release);
        }
        shared.source_done.store(true, Ordering::Release);
        log::info!("Source thread finished");
        result
    }

    fn produce(
        stage: &mut SourceStage,
        ring_buffer: &RingBuffer<ComplexSample>,
        stats: &TransmitStats,
        shared: &SharedState,
        block_size: usize,
        output_rate: f64,
    ) -> Result<(), PipelineError> {
        let mut block = SampleBuf::new(stage.source.format());
        let mut resampled: Vec<ComplexSample> =
            Vec::with_capacity((block_size as f64 * stage.resampler.ratio()).ceil() as usize + 1);

        // integer nanoseconds per output sample for the wait estimate
        let ns_per_sample = (1e9 / output_rate).max(1.0) as u64;
        let backoff = Backoff::new();

        while shared.running.load(Ordering::Acquire) {
            let count = stage.source.read(&mut block, block_size)?;
            if count == 0 {
                log::info!("Source exhausted");
                return Ok(());
            }
            stats.add_samples_read(count as u64);
            stats.set_source_restarts(stage.source.restarts());

            let conditioned = stage.conditioner.process(&block);
            resampled.clear();
            let produced = stage.resampler.process(conditioned, &mut resampled);
            stats.add_samples_resampled(produced as u64);

            let mut offset = 0;
            while offset < resampled.len() {
                if !shared.running.load(Ordering::Acquire) {
                    return Ok(());
                }
                let written = ring_buffer.write(&resampled[offset..]);
                offset += written;
                if written > 0 {
                    backoff.reset();
                    continue;
                }

                // buffer full: spin, then yield, then sleep most of the
                // time the transmitter needs to free the remaining samples
                if !backoff.is_completed() {
                    backoff.snooze();
                } else {
                    let needed = (resampled.len() - offset).min(ring_buffer.capacity());
                    let wait_us = needed as u64 * ns_per_sample / 1_000;
                    let sleep_us = (wait_us * 7 / 10).clamp(100, 10_000);
                    thread::sleep(Duration::from_micros(sleep_us));
                }
            }
        }
        Ok(())
    }

    /// Transmit thread: wait for the prebuffer, then drain the ring into the sink.
    ///
    /// Hands the sink back so it is dropped on the owning thread.
    fn transmit_thread_main(
        mut sink: Box<dyn HardwareSink>,
        ring_buffer: Arc<RingBuffer<ComplexSample>>,
        stats: Arc<TransmitStats>,
        shared: Arc<SharedState>,
        block_size: usize,
        prebuffer_ratio: f64,
    ) -> TransmitResult {
        let prebuffer_samples =
            ((ring_buffer.capacity() as f64 * prebuffer_ratio.clamp(0.0, 1.0)) as usize).max(1);
        log::info!("Transmit thread started, prebuffer target: {} samples", prebuffer_samples);

        let backoff = Backoff::new();
        while shared.running.load(Ordering::Acquire)
            && ring_buffer.available() < prebuffer_samples
            && !shared.source_done.load(Ordering::Acquire)
        {
            Self::idle(&backoff);
        }
        if !shared.running.load(Ordering::Acquire) {
            log::info!("Transmit thread finished before transmission");
            return (sink, Ok(()));
        }
        log::info!("Prebuffer complete");

        let result = Self::transmit(sink.as_mut(), &ring_buffer, &stats, &shared, block_size);
        if let Err(e) = &result {
            log::error!("Transmit thread failed: {}", e);
            shared.running.store(false, Ordering::Release);
        }
        log::info!("Transmit thread finished");
        (sink, result)
    }

    fn transmit(
        sink: &mut dyn HardwareSink,
        ring_buffer: &RingBuffer<ComplexSample>,
        stats: &TransmitStats,
        shared: &SharedState,
        block_size: usize,
    ) -> Result<(), PipelineError> {
        let mut active = ActiveTransmit::acquire(sink)?;
        let mut block = vec![ComplexSample::default(); block_size.max(1)];
        let backoff = Backoff::new();
        let mut starved = false;

        while shared.running.load(Ordering::Acquire) {
            let count = ring_buffer.read(&mut block);
            if count > 0 {
                active.accept(&block[..count])?;
                stats.add_samples_sent(count as u64);
                starved = false;
                backoff.reset();
                continue;
            }

            // source_done is published after the last write, so an empty
            // buffer seen after it is final
            if shared.source_done.load(Ordering::Acquire) && ring_buffer.is_empty() {
                break;
            }
            if !starved {
                starved = true;
                stats.record_underrun();
                log::debug!("Transmit underrun");
            }
            Self::idle(&backoff);
        }
        Ok(())
    }

    #[inline]
    fn idle(backoff: &Backoff) {
        if backoff.is_completed() {
            thread::sleep(Duration::from_micros(200));
        } else {
            backoff.snooze();
        }
    }

    /// Block until the run ends on its own (non-looping source exhausted, or an error).
    pub fn wait(&mut self) -> Result<StopReason, PipelineError> {
        match self.state {
            PipelineState::Running => self.join(),
            _ => Err(PipelineError::InvalidState("pipeline is not running")),
        }
    }

    /// Ask both threads to exit and wait for them.
    ///
    /// Reports `SourceExhausted` if the run had already completed.
    pub fn stop(&mut self) -> Result<StopReason, PipelineError> {
        match self.state {
            PipelineState::Running => {
                let transmitting = self
                    .transmit_thread
                    .as_ref()
                    .map_or(false, |handle| !handle.is_finished());
                if transmitting {
                    self.shared.interrupted.store(true, Ordering::Release);
                }
                self.shared.running.store(false, Ordering::Release);
                self.join()
            }
            PipelineState::Ready => {
                self.state = PipelineState::Stopped;
                Ok(StopReason::InterruptRequested)
            }
            _ => Err(PipelineError::InvalidState("pipeline is not running")),
        }
    }

    fn join(&mut self) -> Result<StopReason, PipelineError> {
        let source_result = match self.source_thread.take() {
            Some(handle) => handle
                .join()
                .unwrap_or(Err(PipelineError::InvalidState("source thread panicked"))),
            None => Ok(()),
        };
        let transmit_result = match self.transmit_thread.take() {
            Some(handle) => match handle.join() {
                Ok((sink, result)) => {
                    self.sink = Some(sink);
                    result
                }
                Err(_) => Err(PipelineError::InvalidState("transmit thread panicked")),
            },
            None => Ok(()),
        };
        self.ring_buffer.clear();
        self.ring_buffer.unlock_memory();

        // the transmit side error is the root cause when both failed
        match transmit_result.and(source_result) {
            Ok(()) => {
                self.state = PipelineState::Stopped;
                let reason = if self.shared.interrupted.load(Ordering::Acquire) {
                    StopReason::InterruptRequested
                } else {
                    StopReason::SourceExhausted
                };
                log::info!("Transmit pipeline stopped: {:?}", reason);
                Ok(reason)
            }
            Err(e) => {
                self.state = PipelineState::Failed;
                log::error!("Transmit pipeline failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Both worker threads have exited; `stop()` or `wait()` returns immediately
    pub fn is_finished(&self) -> bool {
        match self.state {
            PipelineState::Running => {
                self.source_thread.as_ref().map_or(true, |h| h.is_finished())
                    && self.transmit_thread.as_ref().map_or(true, |h| h.is_finished())
            }
            PipelineState::Stopped | PipelineState::Failed => true,
            _ => false,
        }
    }

    pub fn plan(&self) -> &ResamplingPlan {
        &self.plan
    }

    pub fn filter_spec(&self) -> &FilterSpec {
        &self.filter_spec
    }

    pub fn stats(&self) -> PipelineStats {
        let samples_sent = self.stats.samples_sent();
        PipelineStats {
            buffer_fill_ratio: self.ring_buffer.fill_ratio(),
            samples_read: self.stats.samples_read(),
            samples_sent,
            underrun_count: self.stats.underrun_count(),
            source_restarts: self.stats.source_restarts(),
            seconds_sent: samples_sent as f64 / self.plan.output_rate,
            elapsed: self.started_at.map(|t| t.elapsed()).unwrap_or_default(),
        }
    }

    /// End-of-run summary
    pub fn report(&self) -> StatsReport {
        self.stats.report(self.plan.input_rate, self.plan.output_rate)
    }
}

impl Drop for TransmitPipeline {
    fn drop(&mut self) {
        if self.state == PipelineState::Running {
            let _ = self.stop();
        }
    }
}
