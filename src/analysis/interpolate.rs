//! Sub-sample interpolation helpers

use crate::runtime::waveform::{SparseAnalogWaveform, UniformAnalogWaveform};

/// Fractional position of a threshold crossing between samples `a` and `a+1`
///
/// Returns 0 when the two samples are on the same side of the threshold or
/// `a+1` is out of range.
pub fn interpolate_time(samples: &[f32], a: usize, threshold: f32) -> f32 {
    if a + 1 >= samples.len() {
        return 0.0;
    }
    crossing_fraction(samples[a], samples[a + 1], threshold)
}

/// Same as [`interpolate_time`] on the difference `p - n` of a differential pair
pub fn interpolate_time_differential(p: &[f32], n: &[f32], a: usize, threshold: f32) -> f32 {
    if a + 1 >= p.len() || a + 1 >= n.len() {
        return 0.0;
    }
    crossing_fraction(p[a] - n[a], p[a + 1] - n[a + 1], threshold)
}

#[inline]
fn crossing_fraction(first: f32, second: f32, threshold: f32) -> f32 {
    let first_high = first > threshold;
    let second_high = second > threshold;
    if first_high == second_high {
        return 0.0;
    }

    let slope = second - first;
    let delta = threshold - first;
    delta / slope
}

/// Linear value between uniform samples `index` and `index+1`, `frac_ticks` in [0, 1]
///
/// The last sample holds its value. `None` if `index` is out of range.
pub fn interpolate_value(w: &UniformAnalogWaveform, index: usize, frac_ticks: f32) -> Option<f32> {
    let s = w.samples.as_slice();
    let v1 = *s.get(index)?;
    let Some(&v2) = s.get(index + 1) else {
        return Some(v1);
    };
    Some(lerp(v1, v2, frac_ticks))
}

/// Linear value between sparse samples `index` and `index+1`
///
/// `frac_ticks` counts ticks after the start of sample `index` and is scaled by
/// the actual gap to the next sample.
pub fn interpolate_value_sparse(w: &SparseAnalogWaveform, index: usize, frac_ticks: f32) -> Option<f32> {
    let s = w.samples.as_slice();
    let offsets = w.offsets.as_slice();
    let v1 = *s.get(index)?;
    let (Some(&v2), Some(&next)) = (s.get(index + 1), offsets.get(index + 1)) else {
        return Some(v1);
    };

    let gap = next - offsets[index];
    if gap <= 0 {
        return Some(v1);
    }
    Some(lerp(v1, v2, frac_ticks / gap as f32))
}

// Exact at both ends: t = 0 gives a, t = 1 gives b
#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}
