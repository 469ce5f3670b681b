//! Frequency measurement
//!
//! Measures each full cycle of the input from one crossing to the crossing two
//! later. Analog inputs are sliced at their average level.

use crate::analysis::{average, find_zero_crossings};
use crate::runtime::errors::{FilterError, FilterResult};
use crate::runtime::node::{EvalContext, FilterBase, FilterNode, InputSet};
use crate::runtime::stream::{StreamInfo, StreamType, Unit};
use crate::runtime::waveform::{FS_PER_SECOND_F64, Waveform};
use tracing::trace;

pub struct FrequencyMeasurement {
    base: FilterBase,
}

impl FrequencyMeasurement {
    pub fn new() -> Self {
        let mut base = FilterBase::new("Frequency");
        base.add_input("din");
        base.add_stream("data", StreamType::Analog, Unit::Hertz);
        Self { base }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base.set_display_name(name);
        self
    }
}

impl Default for FrequencyMeasurement {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterNode for FrequencyMeasurement {
    fn protocol_name(&self) -> &'static str {
        "Frequency"
    }

    fn base(&self) -> &FilterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FilterBase {
        &mut self.base
    }

    fn validate_channel(&self, i: usize, stream: &StreamInfo) -> bool {
        i == 0 && matches!(stream.stream_type, StreamType::Analog | StreamType::Digital)
    }

    fn refresh(&mut self, inputs: &mut InputSet, ctx: &EvalContext) -> FilterResult<()> {
        let din = inputs.verify_input_ok(0, false)?;

        let threshold = match din {
            Waveform::UniformAnalog(u) => average(u.samples.as_slice()),
            Waveform::SparseAnalog(sp) => average(sp.samples.as_slice()),
            _ => 0.0,
        };
        let edges = find_zero_crossings(ctx.cache, din, threshold);
        if edges.len() < 2 {
            return Err(FilterError::InsufficientData(format!(
                "{} crossings, need a full cycle",
                edges.len()
            )));
        }

        let cap = self.base.setup_empty_sparse_analog_output(din.meta(), 0, true);
        cap.meta.timescale = 1;
        cap.meta.trigger_phase = 0;
        cap.reserve(edges.len() / 2);

        for pair in edges.windows(3).step_by(2) {
            let start = pair[0];
            let delta = pair[2] - start;
            cap.push(start, delta, (FS_PER_SECOND_F64 / delta as f64) as f32);
        }
        cap.mark_modified_from_cpu();
        let cycles = cap.samples.len();

        trace!("[{}] {} cycles measured", self.base.display_name(), cycles);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cache::AnalysisCache;
    use crate::analysis::simd::SimdLevel;
    use crate::runtime::waveform::{UniformAnalogWaveform, UniformDigitalWaveform};

    fn eval(f: &mut FrequencyMeasurement, cache: &AnalysisCache, din: Waveform) -> FilterResult<()> {
        let ctx = EvalContext {
            cache,
            simd: SimdLevel::Scalar,
            gpu_filters_enabled: false,
        };
        f.refresh(&mut InputSet::from_waveforms(vec![Some(din)]), &ctx)
    }

    #[test]
    fn test_square_wave_frequency() {
        // 1 ns ticks, 10-tick period
        let samples: Vec<bool> = (0..100).map(|i| (i / 5) % 2 == 1).collect();
        let w = UniformDigitalWaveform::from_samples(1_000_000, samples);

        let cache = AnalysisCache::new();
        let mut f = FrequencyMeasurement::new();
        eval(&mut f, &cache, w.into()).unwrap();

        let out = f.base().data(0).and_then(Waveform::as_sparse_analog).unwrap();
        assert!(!out.samples.is_empty());
        for &v in out.samples.as_slice() {
            assert!((v - 100e6).abs() < 1.0, "{v}");
        }
        assert_eq!(out.meta.timescale, 1);
        assert_eq!(out.durations.as_slice()[0], 10_000_000);
    }

    #[test]
    fn test_analog_uses_shared_cache() {
        let samples: Vec<f32> = (0..200).map(|i| if (i / 10) % 2 == 0 { 1.0 } else { 3.0 }).collect();
        let w: Waveform = UniformAnalogWaveform::from_samples(1000, samples).into();

        let cache = AnalysisCache::new();
        let mut f = FrequencyMeasurement::new();
        eval(&mut f, &cache, w).unwrap();
        assert_eq!(cache.stats().misses, 1);

        let out = f.base().data(0).and_then(Waveform::as_sparse_analog).unwrap();
        for &v in out.samples.as_slice() {
            // 20 samples of 1 ps
            assert!((v / 50e9 - 1.0).abs() < 1e-6, "{v}");
        }
    }

    #[test]
    fn test_flat_input_has_no_output() {
        let w = UniformAnalogWaveform::from_samples(1, vec![1.0; 16]);
        let cache = AnalysisCache::new();
        let mut f = FrequencyMeasurement::new();
        assert!(matches!(
            eval(&mut f, &cache, w.into()),
            Err(FilterError::InsufficientData(_))
        ));
    }
}
