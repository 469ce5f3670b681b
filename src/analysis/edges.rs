//! Threshold crossing and edge detection
//!
//! All timestamps are femtoseconds from the trigger. Analog crossings are
//! interpolated to sub-sample resolution; digital edges are reported at the
//! middle of the first sample of the new level's tick.

use super::cache::{AnalysisCache, CacheKey};
use super::interpolate::interpolate_time;
use crate::runtime::waveform::{Timebase, Waveform, WaveformData};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Rising,
    Falling,
    Any,
}

impl Polarity {
    #[inline]
    fn matches(self, last: bool, value: bool) -> bool {
        match self {
            Polarity::Rising => value && !last,
            Polarity::Falling => !value && last,
            Polarity::Any => value != last,
        }
    }
}

fn analog_crossings<W: WaveformData<f32>>(w: &W, threshold: f32, polarity: Polarity) -> Vec<i64> {
    let s = w.samples();
    let Some(&first) = s.first() else {
        return Vec::new();
    };

    let timescale = w.meta().timescale;
    let mut edges = Vec::new();
    let mut last = first > threshold;
    for i in 1..s.len() {
        let value = s[i] > threshold;
        if polarity.matches(last, value) {
            let gap = (w.offset(i) - w.offset(i - 1)) * timescale;
            let frac = interpolate_time(s, i - 1, threshold) as f64;
            edges.push(w.offset_scaled(i - 1) + (frac * gap as f64) as i64);
        }
        last = value;
    }
    edges
}

fn digital_edges<W: WaveformData<bool>>(w: &W, polarity: Polarity) -> Vec<i64> {
    let s = w.samples();
    let Some(&first) = s.first() else {
        return Vec::new();
    };

    let meta = w.meta();
    let phoff = meta.timescale / 2 + meta.trigger_phase;
    let mut edges = Vec::new();
    let mut last = first;
    for (i, &value) in s.iter().enumerate().skip(1) {
        if polarity.matches(last, value) {
            edges.push(phoff + meta.timescale * w.offset(i));
        }
        last = value;
    }
    edges
}

fn find_edges(w: &Waveform, threshold: f32, polarity: Polarity) -> Vec<i64> {
    match w {
        Waveform::UniformAnalog(u) => analog_crossings(u, threshold, polarity),
        Waveform::SparseAnalog(sp) => analog_crossings(sp, threshold, polarity),
        Waveform::UniformDigital(u) => digital_edges(u, polarity),
        Waveform::SparseDigital(sp) => digital_edges(sp, polarity),
    }
}

/// Times where the signal goes from at-or-below `threshold` to above it
///
/// `threshold` is ignored for digital waveforms. The waveform must be CPU resident.
pub fn find_rising_edges(w: &Waveform, threshold: f32) -> Vec<i64> {
    find_edges(w, threshold, Polarity::Rising)
}

/// Times where the signal goes from above `threshold` to at-or-below it
pub fn find_falling_edges(w: &Waveform, threshold: f32) -> Vec<i64> {
    find_edges(w, threshold, Polarity::Falling)
}

/// Crossings of either polarity, without going through a cache
pub fn find_zero_crossings_uncached(w: &Waveform, threshold: f32) -> Vec<i64> {
    find_edges(w, threshold, Polarity::Any)
}

/// Crossings of either polarity, memoized in `cache`
///
/// Digital waveforms are keyed with threshold 0 regardless of `threshold`.
pub fn find_zero_crossings(cache: &AnalysisCache, w: &Waveform, threshold: f32) -> Arc<[i64]> {
    let key_threshold = if w.shape().is_analog() { threshold } else { 0.0 };
    cache.get_or_compute(CacheKey::new(w, key_threshold), || {
        find_zero_crossings_uncached(w, threshold)
    })
}
