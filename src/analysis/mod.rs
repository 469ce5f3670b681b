//! Shared signal analysis primitives
//!
//! Edge and threshold detection, sub-sample interpolation, the zero-crossing
//! cache, sparse duration fill and runtime SIMD selection. Everything here
//! works on host-resident sample data.

pub mod cache;
pub mod durations;
pub mod edges;
pub mod events;
pub mod interpolate;
pub mod simd;

pub use cache::{AnalysisCache, CacheKey, CacheStats};
pub use durations::{fill_durations, fill_durations_generic, fill_durations_slices};
pub use edges::{find_falling_edges, find_rising_edges, find_zero_crossings, find_zero_crossings_uncached};
pub use events::{advance_to_timestamp_scaled, next_event_timestamp_scaled};
pub use interpolate::{interpolate_time, interpolate_time_differential, interpolate_value, interpolate_value_sparse};
pub use simd::{SimdLevel, detect_simd_level, effective_simd_level};

/// Smallest and largest sample, `None` if empty
pub fn min_max(samples: &[f32]) -> Option<(f32, f32)> {
    let (&first, rest) = samples.split_first()?;
    Some(rest.iter().fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))))
}

/// Arithmetic mean of the samples, 0 if empty
pub fn average(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&v| v as f64).sum();
    (sum / samples.len() as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max() {
        assert_eq!(min_max(&[]), None);
        assert_eq!(min_max(&[2.0, -1.0, 5.0]), Some((-1.0, 5.0)));
    }

    #[test]
    fn test_average() {
        assert_eq!(average(&[]), 0.0);
        assert_eq!(average(&[1.0, 2.0, 6.0]), 3.0);
    }
}
