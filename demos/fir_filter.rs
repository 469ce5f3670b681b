//! Example: FIR filtering a two-tone capture
//!
//! Sums a low and a high frequency tone, filters the result and reports how
//! much of each survived. `--gpu` runs the convolution as a compute kernel on
//! the host compute queue.
//!
//! Usage:
//!   cargo run --release --example fir_filter -- \
//!       --filter-type low-pass --freq-high 10M
//!
//!   cargo run --release --example fir_filter -- \
//!       --filter-type notch --freq-low 35M --freq-high 45M --gpu

use clap::{Parser, ValueEnum};
use scopegraph::runtime::ExecOptions;
use scopegraph::{
    CaptureSource, FilterGraph, FirFilter, FirFilterType, SimdLevel, StreamDescriptor, Unit,
    UniformAnalogWaveform, Waveform,
};
use std::f64::consts::PI;
use tracing::info;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    LowPass,
    HighPass,
    BandPass,
    Notch,
}

impl From<Kind> for FirFilterType {
    fn from(k: Kind) -> Self {
        match k {
            Kind::LowPass => FirFilterType::LowPass,
            Kind::HighPass => FirFilterType::HighPass,
            Kind::BandPass => FirFilterType::BandPass,
            Kind::Notch => FirFilterType::Notch,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Simd {
    Scalar,
    Avx2,
    Avx512,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, value_enum, default_value = "low-pass")]
    filter_type: Kind,

    /// Lower band edge (accepts SI prefixes, e.g. 35M)
    #[arg(long, default_value = "0")]
    freq_low: String,

    /// Upper band edge (accepts SI prefixes, e.g. 100M)
    #[arg(long, default_value = "10M")]
    freq_high: String,

    /// Stopband attenuation in dB
    #[arg(long, default_value_t = 60.0)]
    atten: f32,

    /// Tap count (0 = derive from attenuation and band)
    #[arg(long, default_value_t = 0)]
    length: usize,

    /// Sample rate of the synthetic capture, in Hz
    #[arg(long, default_value_t = 1e9)]
    sample_rate: f64,

    /// Frequencies of the two test tones, in Hz
    #[arg(long, default_value_t = 1e6)]
    tone_low: f64,
    #[arg(long, default_value_t = 40e6)]
    tone_high: f64,

    /// Number of samples to generate
    #[arg(long, default_value_t = 100_000)]
    samples: usize,

    /// Run the convolution as a compute kernel
    #[arg(long)]
    gpu: bool,

    /// Cap the CPU kernel's vector level
    #[arg(long, value_enum)]
    simd: Option<Simd>,
}

/// Amplitude of a tone in `samples`, by correlation
fn tone_amplitude(samples: &[f32], hz: f64, timescale: i64) -> f64 {
    let w = 2.0 * PI * hz * timescale as f64 * 1e-15;
    let (re, im) = samples.iter().enumerate().fold((0.0, 0.0), |(re, im), (i, &v)| {
        let ph = w * i as f64;
        (re + v as f64 * ph.cos(), im + v as f64 * ph.sin())
    });
    2.0 * (re * re + im * im).sqrt() / samples.len().max(1) as f64
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let timescale = (1e15 / args.sample_rate).round() as i64;

    let mut options = ExecOptions::default().with_gpu_filters(args.gpu);
    if let Some(simd) = args.simd {
        options = options.with_simd_level(match simd {
            Simd::Scalar => SimdLevel::Scalar,
            Simd::Avx2 => SimdLevel::Avx2,
            Simd::Avx512 => SimdLevel::Avx512,
        });
    }

    info!("=== FIR Filter Example ===");
    let mut graph = FilterGraph::with_options(options);
    info!("CPU kernels: {}, GPU filters: {}", graph.simd_level(), args.gpu);

    let input: Vec<f32> = (0..args.samples)
        .map(|i| {
            let t = i as f64 * timescale as f64 * 1e-15;
            ((2.0 * PI * args.tone_low * t).sin() + 0.5 * (2.0 * PI * args.tone_high * t).sin()) as f32
        })
        .collect();

    let scope = graph.add(CaptureSource::new().with_analog_stream("CH1", Unit::Volts));
    let ch1 = StreamDescriptor::new(scope, 0);
    graph.publish(ch1, UniformAnalogWaveform::from_samples(timescale, input.clone()).into())?;

    let fir = graph.add(
        FirFilter::new()
            .with_filter_type(args.filter_type.into())
            .with_stopband_attenuation(args.atten)
            .with_length(args.length),
    );
    graph.set_parameter(fir, "Frequency Low", &args.freq_low)?;
    graph.set_parameter(fir, "Frequency High", &args.freq_high)?;
    graph.set_input(fir, 0, Some(ch1))?;
    info!("Filter '{}'", graph.node(fir).map_or("?", |n| n.name()));

    let mut queue = graph.host_queue();
    graph.refresh_accelerated(fir, &mut queue)?;

    let Some(mut out) = graph.waveform(StreamDescriptor::new(fir, 0)).cloned() else {
        info!("Filter produced no output (run with RUST_LOG=debug for details)");
        return Ok(());
    };
    out.prepare_for_cpu_access();
    let Some(out) = out.as_uniform_analog() else {
        return Ok(());
    };

    let taps = args.samples - out.samples.len();
    info!(
        "{} taps, {} output samples, group delay {} fs, {} compute submissions",
        taps,
        out.samples.len(),
        out.meta.trigger_phase,
        queue.submissions()
    );

    for (name, hz) in [("low", args.tone_low), ("high", args.tone_high)] {
        let before = tone_amplitude(&input, hz, timescale);
        let after = tone_amplitude(out.samples.as_slice(), hz, timescale);
        info!(
            "  {} tone {:.3e} Hz: {:.4} -> {:.4} ({:+.1} dB)",
            name,
            hz,
            before,
            after,
            20.0 * (after / before).log10()
        );
    }

    Ok(())
}
