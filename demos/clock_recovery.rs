//! Example: Clock recovery from a synthetic serial capture
//!
//! Generates a PRBS-7 NRZ signal with finite rise time, optionally running at a
//! slightly different rate than the PLL's nominal symbol rate, and recovers its
//! clock with the bang-bang PLL.
//!
//! Usage:
//!   cargo run --release --example clock_recovery -- \
//!       --symbol-rate 1.25e9 --ppm 300 --uis 4000

use clap::Parser;
use scopegraph::{
    CaptureSource, ClockRecoveryFilter, FilterGraph, FrequencyMeasurement, StreamDescriptor, Unit,
    UniformAnalogWaveform, Waveform,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Nominal symbol rate of the PLL, in Hz
    #[arg(long, default_value_t = 1.25e9)]
    symbol_rate: f64,

    /// Offset of the transmitted data rate from nominal, in ppm
    #[arg(long, default_value_t = 0.0)]
    ppm: f64,

    /// Number of unit intervals to generate
    #[arg(long, default_value_t = 4000)]
    uis: usize,

    /// Samples per unit interval
    #[arg(long, default_value_t = 16)]
    oversample: usize,

    /// Number of recovered clock edges to print
    #[arg(short, long, default_value_t = 8)]
    n: usize,
}

/// PRBS-7 (x^7 + x^6 + 1) bit sequence
fn prbs7(count: usize) -> Vec<bool> {
    let mut state: u8 = 0x7f;
    (0..count)
        .map(|_| {
            let bit = ((state >> 6) ^ (state >> 5)) & 1;
            state = ((state << 1) | bit) & 0x7f;
            bit == 1
        })
        .collect()
}

/// NRZ waveform at +-0.4 V with transitions lasting a quarter UI
fn synthesize(args: &Args, timescale: i64) -> UniformAnalogWaveform {
    let ui_fs = 1e15 / (args.symbol_rate * (1.0 + args.ppm * 1e-6));
    let bits = prbs7(args.uis.max(1));
    let level = |b: bool| if b { 0.4 } else { -0.4 };

    let len = (args.uis as f64 * ui_fs / timescale as f64) as usize;
    let samples = (0..len)
        .map(|i| {
            let t = (i as i64 * timescale) as f64;
            let n = ((t / ui_fs) as usize).min(bits.len() - 1);
            let frac = t / ui_fs - n as f64;
            let cur = level(bits[n]);
            let prev = if n == 0 { cur } else { level(bits[n - 1]) };
            let blend = (frac * 4.0).min(1.0);
            (prev + (cur - prev) * blend) as f32
        })
        .collect();
    UniformAnalogWaveform::from_samples(timescale, samples)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let ui_fs = (1e15 / args.symbol_rate).round() as i64;
    let timescale = (ui_fs / args.oversample.max(2) as i64).max(1);

    info!("=== Clock Recovery Example ===");
    info!(
        "Symbol rate: {:.4e} Hz ({} fs/UI), data offset {} ppm, {} UIs at {} fs/sample",
        args.symbol_rate, ui_fs, args.ppm, args.uis, timescale
    );

    let mut graph = FilterGraph::new();
    let scope = graph.add(CaptureSource::new().with_analog_stream("CH1", Unit::Volts));
    let ch1 = StreamDescriptor::new(scope, 0);
    graph.publish(ch1, synthesize(&args, timescale).into())?;

    let pll = graph.add(ClockRecoveryFilter::new().with_symbol_rate(args.symbol_rate));
    graph.set_input(pll, 0, Some(ch1))?;
    let clk = StreamDescriptor::new(pll, 0);

    let freq = graph.add(FrequencyMeasurement::new());
    graph.set_input(freq, 0, Some(clk))?;

    graph.refresh_all(&[pll, freq])?;

    let Some(recovered) = graph.waveform(clk).and_then(Waveform::as_sparse_digital) else {
        info!("PLL produced no output (run with RUST_LOG=debug for details)");
        return Ok(());
    };

    info!("Recovered {} clock edges", recovered.samples.len());
    for i in 0..args.n.min(recovered.samples.len()) {
        info!(
            "  edge {:>3}: t={} fs period={} fs level={}",
            i,
            recovered.offsets.as_slice()[i],
            recovered.durations.as_slice()[i],
            u8::from(recovered.samples.as_slice()[i])
        );
    }

    if let Some(&period) = recovered.durations.as_slice().last() {
        let expected = 1e15 / (args.symbol_rate * (1.0 + args.ppm * 1e-6));
        info!(
            "Final period {} fs, transmitted {:.0} fs ({:+.1} ppm)",
            period,
            expected,
            (period as f64 - expected) / expected * 1e6
        );
    }

    if let Some(f) = graph.waveform(StreamDescriptor::new(freq, 0)).and_then(Waveform::as_sparse_analog) {
        let hz = f.samples.as_slice();
        if !hz.is_empty() {
            let mean = hz.iter().map(|&v| v as f64).sum::<f64>() / hz.len() as f64;
            // Two clock edges per recovered cycle
            info!("Mean recovered bit rate {:.6e} Hz", mean * 2.0);
        }
    }

    Ok(())
}
