//! Threshold filter: analog to digital with optional hysteresis
//!
//! Uniform inputs produce a uniform digital output; sparse inputs produce a
//! sparse digital output sharing the input's sample timing.

use crate::runtime::errors::{FilterError, FilterResult};
use crate::runtime::node::{EvalContext, FilterBase, FilterNode, InputSet};
use crate::runtime::parameter::FilterParameter;
use crate::runtime::stream::{StreamInfo, StreamType, Unit};
use crate::runtime::waveform::Waveform;

const THRESHOLD: &str = "Threshold";
const HYSTERESIS: &str = "Hysteresis";

pub struct ThresholdFilter {
    base: FilterBase,
}

impl ThresholdFilter {
    pub fn new() -> Self {
        let mut base = FilterBase::new("Threshold");
        base.add_input("din");
        base.add_stream("data", StreamType::Digital, Unit::Counts);
        base.parameters.add(THRESHOLD, FilterParameter::float(0.0, Unit::Volts));
        base.parameters.add(HYSTERESIS, FilterParameter::float(0.0, Unit::Volts));
        Self { base }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base.set_display_name(name);
        self
    }

    pub fn with_threshold(mut self, volts: f32) -> Self {
        if let Some(p) = self.base.parameters.get_mut(THRESHOLD) {
            p.set_float(volts as f64);
        }
        self
    }

    pub fn with_hysteresis(mut self, volts: f32) -> Self {
        if let Some(p) = self.base.parameters.get_mut(HYSTERESIS) {
            p.set_float(volts as f64);
        }
        self
    }
}

impl Default for ThresholdFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Slice the input into logic levels, switching only once a sample clears the
/// band `midpoint ± hysteresis/2`
fn threshold_samples(input: &[f32], out: &mut [bool], midpoint: f32, hysteresis: f32) {
    if hysteresis == 0.0 {
        for (o, &v) in out.iter_mut().zip(input) {
            *o = v > midpoint;
        }
        return;
    }

    let Some(&first) = input.first() else {
        return;
    };
    let rising = midpoint + hysteresis / 2.0;
    let falling = midpoint - hysteresis / 2.0;
    let mut cur = first > midpoint;
    for (o, &v) in out.iter_mut().zip(input) {
        if cur && v < falling {
            cur = false;
        } else if !cur && v > rising {
            cur = true;
        }
        *o = cur;
    }
}

impl FilterNode for ThresholdFilter {
    fn protocol_name(&self) -> &'static str {
        "Threshold"
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

    fn refresh(&mut self, inputs: &mut InputSet, _ctx: &EvalContext) -> FilterResult<()> {
        let din = inputs.verify_input_ok(0, false)?;
        let midpoint = self.base.parameters.float(THRESHOLD) as f32;
        let hysteresis = self.base.parameters.float(HYSTERESIS) as f32;

        match din {
            Waveform::UniformAnalog(u) => {
                let len = u.samples.len();
                let cap = self.base.setup_empty_uniform_digital_output(&u.meta, 0);
                cap.resize(len);
                threshold_samples(u.samples.as_slice(), cap.samples.as_mut_slice(), midpoint, hysteresis);
                cap.mark_modified_from_cpu();
            }
            Waveform::SparseAnalog(sp) => {
                let cap = self.base.setup_sparse_digital_output(sp, 0, 0, 0);
                threshold_samples(sp.samples.as_slice(), cap.samples.as_mut_slice(), midpoint, hysteresis);
                cap.samples.mark_modified_from_cpu();
            }
            other => {
                return Err(FilterError::WrongShape {
                    index: 0,
                    expected: "analog",
                    actual: other.shape(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cache::AnalysisCache;
    use crate::analysis::simd::SimdLevel;
    use crate::runtime::waveform::{SparseAnalogWaveform, UniformAnalogWaveform, UniformDigitalWaveform};

    fn eval(filter: &mut ThresholdFilter, din: Waveform) -> FilterResult<()> {
        let cache = AnalysisCache::new();
        let ctx = EvalContext {
            cache: &cache,
            simd: SimdLevel::Scalar,
            gpu_filters_enabled: false,
        };
        filter.refresh(&mut InputSet::from_waveforms(vec![Some(din)]), &ctx)
    }

    #[test]
    fn test_plain_threshold() {
        let mut f = ThresholdFilter::new().with_threshold(0.5);
        let w = UniformAnalogWaveform::from_samples(10, vec![0.0, 0.6, 0.4, 1.0]);
        eval(&mut f, w.into()).unwrap();

        let out = f.base().data(0).and_then(Waveform::as_uniform_digital).unwrap();
        assert_eq!(out.samples.as_slice(), &[false, true, false, true]);
        assert_eq!(out.meta.timescale, 10);
    }

    #[test]
    fn test_hysteresis_holds_state() {
        let mut out = [false; 6];
        threshold_samples(&[0.0, 0.55, 0.7, 0.45, 0.2, 0.6], &mut out, 0.5, 0.2);
        assert_eq!(out, [false, false, true, true, false, false]);
    }

    #[test]
    fn test_sparse_keeps_timing() {
        let mut f = ThresholdFilter::new();
        let w = SparseAnalogWaveform::from_parts(5, vec![0, 2, 7], vec![2, 5, 1], vec![-1.0, 1.0, -1.0]);
        eval(&mut f, w.into()).unwrap();

        let out = f.base().data(0).and_then(Waveform::as_sparse_digital).unwrap();
        assert_eq!(out.offsets.as_slice(), &[0, 2, 7]);
        assert_eq!(out.durations.as_slice(), &[2, 5, 1]);
        assert_eq!(out.samples.as_slice(), &[false, true, false]);
    }

    #[test]
    fn test_rejects_digital_input() {
        let mut f = ThresholdFilter::new();
        let w = UniformDigitalWaveform::from_samples(1, vec![true]);
        assert!(matches!(eval(&mut f, w.into()), Err(FilterError::WrongShape { .. })));
    }
}
