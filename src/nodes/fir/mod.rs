//! FIR filter node
//!
//! Designs a Kaiser-windowed filter for the input's sample rate and convolves
//! it with the input. The output covers only the fully overlapped part of the
//! convolution and is shifted by the group delay so it lines up with the input.

pub mod design;
pub mod kernels;

pub use design::{FirDesign, FirFilterType, FirSpec, MAX_FILTER_LENGTH, design_filter};
pub use kernels::{FIR_BLOCK_SIZE, FirKernel, filter_cpu, filter_generic};

use crate::runtime::buffer::{AcceleratorBuffer, DataLocation, UsageHint};
use crate::runtime::dispatch::{CommandBuffer, ComputeQueue, compute_block_count};
use crate::runtime::errors::{FilterError, FilterResult};
use crate::runtime::node::{EvalContext, FilterBase, FilterNode, InputSet};
use crate::runtime::parameter::FilterParameter;
use crate::runtime::stream::{StreamInfo, StreamType, Unit};
use crate::runtime::waveform::FS_PER_SECOND_F64;
use tracing::{debug, trace};

const FILTER_TYPE: &str = "Filter Type";
const LENGTH: &str = "Length";
const STOPBAND_ATTEN: &str = "Stopband Attenuation";
const FREQ_LOW: &str = "Frequency Low";
const FREQ_HIGH: &str = "Frequency High";

pub struct FirFilter {
    base: FilterBase,
    coefficients: AcceleratorBuffer<f32>,
    /// Filter parameters and input timescale the current coefficients were designed for
    designed_for: Option<(FirSpec, i64)>,
}

impl FirFilter {
    pub fn new() -> Self {
        let mut base = FilterBase::new("FIR Filter");
        base.add_input("in");
        base.add_stream("data", StreamType::Analog, Unit::Volts);
        base.parameters
            .add(FILTER_TYPE, FilterParameter::enumeration(&FirFilterType::NAMES, 0));
        base.parameters.add(LENGTH, FilterParameter::int(0, Unit::SampleDepth));
        base.parameters
            .add(STOPBAND_ATTEN, FilterParameter::float(60.0, Unit::Decibels));
        base.parameters.add(FREQ_LOW, FilterParameter::float(0.0, Unit::Hertz));
        base.parameters.add(FREQ_HIGH, FilterParameter::float(100e6, Unit::Hertz));

        let mut coefficients = AcceleratorBuffer::new();
        coefficients.set_cpu_access_hint(UsageHint::Likely);
        coefficients.set_gpu_access_hint(UsageHint::Likely);

        Self {
            base,
            coefficients,
            designed_for: None,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base.set_display_name(name);
        self
    }

    pub fn with_filter_type(mut self, filter_type: FirFilterType) -> Self {
        self.set_param(FILTER_TYPE, |p| p.set_int(filter_type.index() as i64));
        self
    }

    /// Fixed tap count; 0 derives it from the attenuation and band
    pub fn with_length(mut self, taps: usize) -> Self {
        self.set_param(LENGTH, |p| p.set_int(taps as i64));
        self
    }

    pub fn with_stopband_attenuation(mut self, db: f32) -> Self {
        self.set_param(STOPBAND_ATTEN, |p| p.set_float(db as f64));
        self
    }

    pub fn with_frequency_low(mut self, hz: f64) -> Self {
        self.set_param(FREQ_LOW, |p| p.set_float(hz));
        self
    }

    pub fn with_frequency_high(mut self, hz: f64) -> Self {
        self.set_param(FREQ_HIGH, |p| p.set_float(hz));
        self
    }

    fn set_param(&mut self, name: &str, f: impl FnOnce(&mut FilterParameter)) {
        if let Some(p) = self.base.parameters.get_mut(name) {
            f(p);
        }
    }

    /// Current filter settings
    pub fn spec(&self) -> FirSpec {
        let params = &self.base.parameters;
        FirSpec {
            filter_type: FirFilterType::from_index(params.enum_index(FILTER_TYPE))
                .unwrap_or(FirFilterType::LowPass),
            length: params.int(LENGTH).max(0) as usize,
            stopband_atten: params.float(STOPBAND_ATTEN) as f32,
            freq_low: params.float(FREQ_LOW),
            freq_high: params.float(FREQ_HIGH),
        }
    }

    /// Coefficients of the last successful design
    pub fn coefficients(&self) -> &[f32] {
        self.coefficients.as_slice()
    }

    /// Redesign the filter unless its parameters and sample rate are unchanged
    fn update_coefficients(&mut self, timescale: i64) -> FilterResult<()> {
        let spec = self.spec();
        if self.designed_for == Some((spec, timescale)) {
            return Ok(());
        }
        self.designed_for = None;

        let d = design_filter(&spec, FS_PER_SECOND_F64 / timescale as f64)?;
        debug!(
            "[{}] {} filter, {} taps, {:.0} Hz .. {:.0} Hz",
            self.base.display_name(),
            spec.filter_type,
            d.len(),
            d.freq_low,
            d.freq_high
        );

        self.coefficients.prepare_for_cpu_access();
        self.coefficients.resize(d.len());
        self.coefficients.as_mut_slice().copy_from_slice(&d.coefficients);
        self.coefficients.mark_modified_from_cpu();
        self.designed_for = Some((spec, timescale));
        Ok(())
    }

    fn run(&mut self, inputs: &mut InputSet, ctx: &EvalContext, queue: Option<&mut dyn ComputeQueue>) -> FilterResult<()> {
        let din = inputs.require_uniform_analog_mut(0)?;
        if din.meta.timescale <= 0 {
            return Err(FilterError::InvalidConfig(format!(
                "input timescale {} fs",
                din.meta.timescale
            )));
        }
        self.update_coefficients(din.meta.timescale)?;

        let filterlen = self.coefficients.len();
        let len = din.samples.len();
        if len <= filterlen {
            return Err(FilterError::InsufficientData(format!(
                "{len} samples for a {filterlen}-tap filter"
            )));
        }
        let end = len - filterlen;
        let radius = (filterlen - 1) / 2;

        let cap = self.base.setup_empty_uniform_analog_output(&din.meta, 0, false);
        cap.resize(end);

        match queue {
            Some(queue) => {
                din.prepare_for_gpu_access();
                self.coefficients.prepare_for_gpu_access();
                cap.prepare_for_gpu_access();

                let mut cmd = CommandBuffer::new();
                cmd.bind_input(0, &din.samples)
                    .bind_input(1, &self.coefficients)
                    .bind_output(2, &mut cap.samples)
                    .push_constants(&[end as u32, filterlen as u32])
                    .dispatch(&FirKernel, compute_block_count(end, FIR_BLOCK_SIZE));
                queue.submit_and_block(cmd)?;
                cap.mark_modified_from_gpu();
                trace!("[{}] {} samples filtered on device", self.base.display_name(), end);
            }
            None => {
                din.prepare_for_cpu_access();
                self.coefficients.prepare_for_cpu_access();
                filter_cpu(
                    din.samples.as_slice(),
                    self.coefficients.as_slice(),
                    cap.samples.as_mut_slice(),
                    ctx.simd,
                );
                cap.mark_modified_from_cpu();
                trace!("[{}] {} samples filtered ({})", self.base.display_name(), end, ctx.simd);
            }
        }

        // Compensate for the group delay
        if let Some(cap) = self.base.data_mut(0) {
            cap.meta_mut().trigger_phase = radius as i64 * din.meta.timescale + din.meta.trigger_phase;
        }
        Ok(())
    }
}

impl Default for FirFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterNode for FirFilter {
    fn protocol_name(&self) -> &'static str {
        "FIR Filter"
    }

    fn base(&self) -> &FilterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FilterBase {
        &mut self.base
    }

    fn validate_channel(&self, i: usize, stream: &StreamInfo) -> bool {
        i == 0 && stream.stream_type == StreamType::Analog
    }

    fn refresh(&mut self, inputs: &mut InputSet, ctx: &EvalContext) -> FilterResult<()> {
        self.run(inputs, ctx, None)
    }

    fn refresh_accelerated(
        &mut self,
        inputs: &mut InputSet,
        ctx: &EvalContext,
        queue: &mut dyn ComputeQueue,
    ) -> FilterResult<()> {
        if ctx.gpu_filters_enabled {
            self.run(inputs, ctx, Some(queue))
        } else {
            self.run(inputs, ctx, None)
        }
    }

    /// Residency is handled per backend
    fn input_location(&self) -> DataLocation {
        DataLocation::DontCare
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cache::AnalysisCache;
    use crate::analysis::simd::SimdLevel;
    use crate::runtime::dispatch::HostComputeQueue;
    use crate::runtime::waveform::{UniformAnalogWaveform, Waveform};

    const TS: i64 = 1_000_000; // 1 GS/s

    fn ctx(cache: &AnalysisCache, gpu: bool) -> EvalContext<'_> {
        EvalContext {
            cache,
            simd: SimdLevel::Scalar,
            gpu_filters_enabled: gpu,
        }
    }

    fn input(samples: Vec<f32>) -> InputSet {
        let mut w = UniformAnalogWaveform::from_samples(TS, samples);
        w.meta.trigger_phase = 1234;
        InputSet::from_waveforms(vec![Some(w.into())])
    }

    fn tone(len: usize, hz: f64) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * hz * i as f64 * TS as f64 / FS_PER_SECOND_F64).sin() as f32)
            .collect()
    }

    fn output(f: &mut FirFilter) -> UniformAnalogWaveform {
        let w = f.base_mut().data_mut(0).and_then(Waveform::as_uniform_analog_mut).unwrap();
        w.prepare_for_cpu_access();
        w.clone()
    }

    #[test]
    fn test_lowpass_passes_dc_and_shifts_output() {
        let cache = AnalysisCache::new();
        let mut f = FirFilter::new();
        f.refresh(&mut input(vec![0.5; 1000]), &ctx(&cache, false)).unwrap();

        assert_eq!(f.coefficients().len(), 27);
        let out = output(&mut f);
        assert_eq!(out.samples.len(), 1000 - 27);
        assert_eq!(out.meta.trigger_phase, 13 * TS + 1234);
        for &v in out.samples.as_slice() {
            assert!((v - 0.5).abs() < 0.01, "{v}");
        }
    }

    #[test]
    fn test_lowpass_rejects_stopband_tone() {
        let cache = AnalysisCache::new();
        let mut f = FirFilter::new();
        f.refresh(&mut input(tone(2000, 400e6)), &ctx(&cache, false)).unwrap();

        let out = output(&mut f);
        let peak = out.samples.iter().fold(0f32, |m, v| m.max(v.abs()));
        assert!(peak < 0.01, "{peak}");
    }

    #[test]
    fn test_gpu_path_matches_cpu() {
        let cache = AnalysisCache::new();
        let samples = tone(3000, 37e6);

        let mut cpu = FirFilter::new().with_filter_type(FirFilterType::BandPass).with_frequency_low(20e6);
        cpu.refresh(&mut input(samples.clone()), &ctx(&cache, false)).unwrap();

        let mut gpu = FirFilter::new().with_filter_type(FirFilterType::BandPass).with_frequency_low(20e6);
        let mut queue = HostComputeQueue::new().with_workers(4);
        gpu.refresh_accelerated(&mut input(samples), &ctx(&cache, true), &mut queue)
            .unwrap();
        assert_eq!(queue.submissions(), 1);

        let raw = gpu.base().data(0).and_then(Waveform::as_uniform_analog).unwrap();
        assert!(raw.samples.is_gpu_resident());
        assert!(!raw.samples.is_cpu_resident());

        assert_eq!(output(&mut gpu).samples.as_slice(), output(&mut cpu).samples.as_slice());
    }

    #[test]
    fn test_gpu_disabled_runs_on_cpu() {
        let cache = AnalysisCache::new();
        let mut f = FirFilter::new();
        let mut queue = HostComputeQueue::new();
        f.refresh_accelerated(&mut input(vec![1.0; 200]), &ctx(&cache, false), &mut queue)
            .unwrap();
        assert_eq!(queue.submissions(), 0);
        assert!(output(&mut f).samples.is_cpu_resident());
    }

    #[test]
    fn test_zero_width_band_has_no_output() {
        let cache = AnalysisCache::new();
        let mut f = FirFilter::new()
            .with_filter_type(FirFilterType::Notch)
            .with_frequency_low(50e6)
            .with_frequency_high(50e6);
        assert!(matches!(
            f.refresh(&mut input(vec![0.0; 100]), &ctx(&cache, false)),
            Err(FilterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_short_input_has_no_output() {
        let cache = AnalysisCache::new();
        let mut f = FirFilter::new();
        assert!(matches!(
            f.refresh(&mut input(vec![0.0; 27]), &ctx(&cache, false)),
            Err(FilterError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_redesign_on_parameter_change() {
        let cache = AnalysisCache::new();
        let mut f = FirFilter::new();
        f.refresh(&mut input(vec![0.0; 500]), &ctx(&cache, false)).unwrap();
        assert_eq!(f.coefficients().len(), 27);

        f.base_mut().parameters.set(LENGTH, "41").unwrap();
        f.refresh(&mut input(vec![0.0; 500]), &ctx(&cache, false)).unwrap();
        assert_eq!(f.coefficients().len(), 41);
        assert_eq!(output(&mut f).samples.len(), 500 - 41);
    }
}
