//! Whole-graph runs on a synthetic capture

use scopegraph::runtime::ExecOptions;
use scopegraph::{
    CaptureSource, ClockRecoveryFilter, FilterGraph, FirFilter, FrequencyMeasurement, NodeId,
    StreamDescriptor, ThresholdFilter, Unit, UniformAnalogWaveform, Waveform, find_zero_crossings,
};
use std::f64::consts::PI;

/// 1 MS/s sample period
const TIMESCALE: i64 = 1_000_000_000;
/// Half a 1 kHz cycle
const HALF_CYCLE_FS: i64 = 500_000_000_000;

fn sine_capture() -> Waveform {
    let samples = (0..10_000)
        .map(|i| (2.0 * PI * 1e3 * i as f64 * 1e-6 + 0.3).sin() as f32)
        .collect();
    UniformAnalogWaveform::from_samples(TIMESCALE, samples).into()
}

fn scope_graph(options: ExecOptions) -> (FilterGraph, StreamDescriptor) {
    let mut graph = FilterGraph::with_options(options);
    let scope = graph.add(CaptureSource::new().with_name("scope").with_analog_stream("CH1", Unit::Volts));
    let ch1 = StreamDescriptor::new(scope, 0);
    graph.publish(ch1, sine_capture()).unwrap();
    (graph, ch1)
}

fn connect(graph: &mut FilterGraph, node: NodeId, input: StreamDescriptor) -> StreamDescriptor {
    graph.set_input(node, 0, Some(input)).unwrap();
    StreamDescriptor::new(node, 0)
}

#[test]
fn sine_crossings_are_half_a_cycle_apart() {
    let (graph, ch1) = scope_graph(ExecOptions::default());
    let w = graph.waveform(ch1).unwrap();

    let edges = find_zero_crossings(graph.cache(), w, 0.0);
    assert_eq!(edges.len(), 20);

    // First crossing at (pi - 0.3) / (2 pi * 1 kHz)
    let first = ((PI - 0.3) / (2.0 * PI * 1e3) * 1e15) as i64;
    assert!((edges[0] - first).abs() < 50_000_000, "{}", edges[0]);

    for pair in edges.windows(2) {
        let spacing = pair[1] - pair[0];
        assert!((spacing - HALF_CYCLE_FS).abs() < 50_000_000, "{spacing}");
    }

    // Second lookup is served from the cache
    let again = find_zero_crossings(graph.cache(), w, 0.0);
    assert_eq!(graph.cache().stats().hits, 1);
    assert_eq!(&*again, &*edges);
}

#[test]
fn frequency_of_capture() {
    let (mut graph, ch1) = scope_graph(ExecOptions::default());
    let freq = graph.add(FrequencyMeasurement::new());
    let out = connect(&mut graph, freq, ch1);
    graph.refresh(freq).unwrap();

    let w = graph.waveform(out).and_then(Waveform::as_sparse_analog).unwrap();
    assert_eq!(w.samples.len(), 9);
    for &f in w.samples.as_slice() {
        assert!((f - 1000.0).abs() < 0.01, "{f}");
    }
}

#[test]
fn clock_recovered_from_sliced_capture() {
    let (mut graph, ch1) = scope_graph(ExecOptions::default());
    let slicer = graph.add(ThresholdFilter::new());
    let digital = connect(&mut graph, slicer, ch1);
    let pll = graph.add(ClockRecoveryFilter::new());
    let clk = connect(&mut graph, pll, digital);

    // One UI per half cycle
    graph.set_parameter(pll, "Symbol rate", "2 kHz").unwrap();
    graph.refresh_all(&[slicer, pll]).unwrap();

    let w = graph.waveform(clk).and_then(Waveform::as_sparse_digital).unwrap();
    assert!(!w.samples.is_empty());
    assert_eq!(w.meta.timescale, 1);
    for &d in w.durations.as_slice() {
        assert!((d - HALF_CYCLE_FS).abs() < HALF_CYCLE_FS / 100, "{d}");
    }

    // A symbol rate above the input's Nyquist limit leaves the output empty
    graph.set_parameter(pll, "Symbol rate", "1 GHz").unwrap();
    graph.refresh(pll).unwrap();
    assert!(graph.waveform(clk).is_none());
}

#[test]
fn gate_with_no_capture_leaves_clock_running() {
    let (mut graph, ch1) = scope_graph(ExecOptions::default());
    let slicer = graph.add(ThresholdFilter::new());
    let digital = connect(&mut graph, slicer, ch1);
    let pll = graph.add(ClockRecoveryFilter::new());
    let clk = connect(&mut graph, pll, digital);

    // Gate wired to a channel that has not captured anything
    let gate_src = graph.add(CaptureSource::new().with_name("la").with_digital_stream("D0"));
    graph.set_input(pll, 1, Some(StreamDescriptor::new(gate_src, 0))).unwrap();
    graph.set_parameter(pll, "Symbol rate", "2 kHz").unwrap();
    graph.refresh_all(&[slicer, pll]).unwrap();

    let w = graph.waveform(clk).and_then(Waveform::as_sparse_digital).unwrap();
    assert!(!w.samples.is_empty());
}

#[test]
fn filtered_capture_keeps_frequency_and_timing() {
    let options = ExecOptions::default().with_gpu_filters(true);
    let (mut graph, ch1) = scope_graph(options);

    let fir = graph.add(FirFilter::new().with_frequency_high(10e3));
    let filtered = connect(&mut graph, fir, ch1);
    let freq = graph.add(FrequencyMeasurement::new());
    let out = connect(&mut graph, freq, filtered);

    let mut queue = graph.host_queue();
    graph.refresh_accelerated(fir, &mut queue).unwrap();
    assert_eq!(queue.submissions(), 1);

    let w = graph.waveform(filtered).and_then(Waveform::as_uniform_analog).unwrap();
    assert_eq!(w.samples.len(), 10_000 - 273);
    assert_eq!(w.meta.trigger_phase, 136 * TIMESCALE);
    assert!(w.samples.is_gpu_resident());

    // The frequency node reads on the CPU; the graph moves the data back
    graph.refresh(freq).unwrap();
    let f = graph.waveform(out).and_then(Waveform::as_sparse_analog).unwrap();
    assert!(!f.samples.is_empty());
    for &v in f.samples.as_slice() {
        assert!((v - 1000.0).abs() < 0.1, "{v}");
    }

    // Group delay compensation keeps the crossings where the raw ones are
    let raw = find_zero_crossings(graph.cache(), graph.waveform(ch1).unwrap(), 0.0);
    let mut cpu_view = graph.waveform(filtered).unwrap().clone();
    cpu_view.prepare_for_cpu_access();
    let shifted = find_zero_crossings(graph.cache(), &cpu_view, 0.0);
    let offset = raw.iter().position(|&t| t >= shifted[0] - HALF_CYCLE_FS / 2).unwrap();
    for (a, b) in raw[offset..].iter().zip(shifted.iter()) {
        assert!((a - b).abs() < TIMESCALE, "{a} vs {b}");
    }
}

#[test]
fn releasing_the_last_reference_destroys_the_chain() {
    let (mut graph, ch1) = scope_graph(ExecOptions::default());
    let slicer = graph.add(ThresholdFilter::new());
    let digital = connect(&mut graph, slicer, ch1);
    let pll = graph.add(ClockRecoveryFilter::new());
    connect(&mut graph, pll, digital);

    // Host drops its handles on the intermediate nodes first
    graph.release(slicer).unwrap();
    graph.release(ch1.node).unwrap();
    assert_eq!(graph.len(), 3);

    graph.release(pll).unwrap();
    assert!(graph.is_empty());
}
