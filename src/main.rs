//! iq-player - send a raw sample file to an SDR transmitter
//!
//! Reads 32-bit little-endian float samples (interleaved I/Q, or real with
//! `--real`), picks the hardware interpolation that fits the file's sample
//! rate, resamples the remainder and transmits until the file ends or
//! Ctrl+C.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use iq_player::engine::{PipelineConfig, StopReason, TransmitParameters, TransmitPipeline};
use iq_player::sink::{HardwareSink, SimulatedSink, SimulatedSinkConfig};
use iq_player::source::{FileSource, SampleFormat};
use iq_player::units::{format_eng, parse_eng};

/// Send samples from a raw file to an SDR transmitter
#[derive(Parser)]
#[command(name = "iq-player")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raw sample file (little-endian f32)
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Center frequency, e.g. 433.92M
    #[arg(short, long, value_parser = parse_eng, value_name = "FREQ")]
    freq: Option<f64>,

    /// Gain in dB (default is the midpoint of the device's range)
    #[arg(short, long, value_parser = parse_eng, allow_negative_numbers = true)]
    gain: Option<f64>,

    /// Sample rate of the input file, e.g. 1M
    #[arg(short, long, value_parser = parse_eng, value_name = "RATE")]
    rate: Option<f64>,

    /// Loop the input file
    #[arg(short, long = "loop")]
    loop_source: bool,

    /// Input file holds real samples (default is complex)
    #[arg(long)]
    real: bool,

    /// SoapySDR device arguments, e.g. "driver=uhd"
    #[arg(short, long, default_value = "")]
    device: String,

    /// Transmit channel
    #[arg(long, default_value = "0")]
    channel: usize,

    /// Use the simulated transmitter instead of hardware
    #[arg(long)]
    sim: bool,

    /// Capture what the simulated transmitter receives to a cf32 file
    #[arg(long, value_name = "FILE")]
    sim_output: Option<PathBuf>,

    /// Let the simulated transmitter run as fast as possible
    #[arg(long)]
    sim_unpaced: bool,

    /// Buffer size in milliseconds of input
    #[arg(short, long, default_value = "500")]
    buffer_ms: u32,

    /// Do not request realtime scheduling
    #[arg(long)]
    no_realtime: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    // before any thread is spawned, so the workers inherit it
    if !cli.no_realtime {
        enable_realtime_scheduling();
    }

    let config = create_pipeline_config(&cli);
    let source = FileSource::open(&cli.file, config.format, cli.loop_source)
        .with_context(|| format!("cannot read {}", cli.file.display()))?;
    let sink = open_sink(&cli)?;

    println!("iq-player - {} ({} samples, {})", cli.file.display(), source.len(), config.format);
    println!("Using {}", sink.describe());
    let caps = sink.capabilities()?;
    println!(
        "Possible tx frequency range: {} - {}",
        format_eng(caps.frequency_range.0),
        format_eng(caps.frequency_range.1)
    );

    let mut pipeline = TransmitPipeline::new(config, Box::new(source), sink)?;
    let plan = *pipeline.plan();
    println!(
        "Interpolation: {} | Output rate: {}S/s | Resampling ratio: {:.6}",
        plan.interpolation,
        format_eng(plan.output_rate),
        plan.residual_ratio
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    pipeline.start()?;
    println!("Transmitting. Press Ctrl+C to stop.\n");

    while running.load(Ordering::SeqCst) && !pipeline.is_finished() {
        let stats = pipeline.stats();
        print!(
            "\r  {:9.2} s sent  |  Buffer: {:5.1}%  |  Underruns: {}  |  Loops: {}  ",
            stats.seconds_sent,
            stats.buffer_fill_ratio * 100.0,
            stats.underrun_count,
            stats.source_restarts
        );
        io::stdout().flush()?;
        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    let result = pipeline.stop();
    println!("\n{}", pipeline.report());
    match result? {
        StopReason::SourceExhausted => println!("End of file reached."),
        StopReason::InterruptRequested => println!("Transmission interrupted."),
    }

    Ok(())
}

/// Map command line options onto the pipeline configuration
fn create_pipeline_config(cli: &Cli) -> PipelineConfig {
    let defaults = PipelineConfig::default();
    let format = if cli.real {
        SampleFormat::Real
    } else {
        SampleFormat::Complex
    };

    // sized in input samples; the resampled stream is usually within 2x of that
    let buffer_samples = cli
        .rate
        .map(|rate| (rate * cli.buffer_ms as f64 / 1000.0 * 2.0) as usize)
        .unwrap_or(defaults.buffer_samples)
        .max(defaults.block_size * 4);

    PipelineConfig {
        input_rate: cli.rate,
        format,
        params: TransmitParameters {
            center_frequency: cli.freq,
            gain: cli.gain,
            loop_source: cli.loop_source,
        },
        buffer_samples,
        ..defaults
    }
}

#[cfg(feature = "soapy")]
fn open_sink(cli: &Cli) -> anyhow::Result<Box<dyn HardwareSink>> {
    use iq_player::sink::SoapySink;

    if cli.sim {
        return Ok(simulated_sink(cli));
    }
    let sink = SoapySink::open(&cli.device, cli.channel)
        .with_context(|| format!("cannot open SoapySDR device \"{}\"", cli.device))?;
    Ok(Box::new(sink))
}

#[cfg(not(feature = "soapy"))]
fn open_sink(cli: &Cli) -> anyhow::Result<Box<dyn HardwareSink>> {
    if !cli.sim {
        log::warn!(
            "Built without SoapySDR support, ignoring device \"{}\" channel {} and using the simulated transmitter",
            cli.device,
            cli.channel
        );
    }
    Ok(simulated_sink(cli))
}

fn simulated_sink(cli: &Cli) -> Box<dyn HardwareSink> {
    Box::new(SimulatedSink::new(SimulatedSinkConfig {
        capture: cli.sim_output.clone(),
        realtime: !cli.sim_unpaced,
        ..Default::default()
    }))
}

/// Ask for a realtime scheduling class for the whole process.
///
/// Failure only degrades timing, so it is logged and ignored.
#[cfg(target_os = "linux")]
fn enable_realtime_scheduling() {
    unsafe {
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        let min = libc::sched_get_priority_min(libc::SCHED_FIFO);
        let param = libc::sched_param {
            sched_priority: (min + max) / 2,
        };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) == 0 {
            log::info!("Realtime scheduling enabled (SCHED_FIFO, priority {})", param.sched_priority);
        } else {
            log::warn!(
                "Failed to enable realtime scheduling: {}",
                io::Error::last_os_error()
            );
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn enable_realtime_scheduling() {
    unsafe {
        if libc::setpriority(libc::PRIO_PROCESS, 0, -10) == 0 {
            log::info!("Process priority raised (nice -10)");
        } else {
            log::warn!(
                "Failed to raise process priority: {}",
                io::Error::last_os_error()
            );
        }
    }
}
