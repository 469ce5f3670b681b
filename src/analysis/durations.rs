//! Sparse waveform duration fill
//!
//! `durations[i] = offsets[i+1] - offsets[i]`, with the last sample lasting one tick.

use super::simd::SimdLevel;
use crate::runtime::waveform::SparseWaveform;

/// Scalar reference implementation
pub fn fill_durations_generic(offsets: &[i64], durations: &mut [i64]) {
    let len = offsets.len().min(durations.len());
    if len == 0 {
        return;
    }
    for i in 0..len - 1 {
        durations[i] = offsets[i + 1] - offsets[i];
    }
    durations[len - 1] = 1;
}

/// AVX2 implementation, four lanes per iteration with a scalar tail
///
/// # Safety
/// The CPU must support AVX2.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
pub unsafe fn fill_durations_avx2(offsets: &[i64], durations: &mut [i64]) {
    use std::arch::x86_64::*;

    let len = offsets.len().min(durations.len());
    if len == 0 {
        return;
    }

    // Each block reads offsets[i..i+5]
    let mut i = 0;
    while i + 4 < len {
        unsafe {
            let a = _mm256_loadu_si256(offsets.as_ptr().add(i) as *const __m256i);
            let b = _mm256_loadu_si256(offsets.as_ptr().add(i + 1) as *const __m256i);
            let d = _mm256_sub_epi64(b, a);
            _mm256_storeu_si256(durations.as_mut_ptr().add(i) as *mut __m256i, d);
        }
        i += 4;
    }

    while i + 1 < len {
        durations[i] = offsets[i + 1] - offsets[i];
        i += 1;
    }
    durations[len - 1] = 1;
}

/// Fill `durations` from `offsets` at the given vector level
pub fn fill_durations_slices(offsets: &[i64], durations: &mut [i64], level: SimdLevel) {
    #[cfg(target_arch = "x86_64")]
    {
        if level >= SimdLevel::Avx2 && is_x86_feature_detected!("avx2") {
            // SAFETY: AVX2 support checked above
            unsafe { fill_durations_avx2(offsets, durations) };
            return;
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    let _ = level;

    fill_durations_generic(offsets, durations);
}

/// Recompute every duration of a sparse waveform from its offsets
pub fn fill_durations<S: Copy + Default>(w: &mut SparseWaveform<S>, level: SimdLevel) {
    w.offsets.prepare_for_cpu_access();
    w.durations.resize(w.offsets.len());
    fill_durations_slices(w.offsets.as_slice(), w.durations.as_mut_slice(), level);
    w.durations.mark_modified_from_cpu();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::simd::detect_simd_level;

    #[test]
    fn test_generic_fill() {
        let offsets = [0, 10, 25, 40];
        let mut durations = [0; 4];
        fill_durations_generic(&offsets, &mut durations);
        assert_eq!(durations, [10, 15, 15, 1]);
    }

    #[test]
    fn test_single_sample() {
        let mut durations = [7];
        fill_durations_generic(&[100], &mut durations);
        assert_eq!(durations, [1]);
    }

    #[test]
    fn test_vector_matches_scalar_for_all_lengths() {
        let level = detect_simd_level();
        for len in 0..40usize {
            let offsets: Vec<i64> = (0..len as i64).map(|i| i * i * 3 + (i % 5) * 7).collect();
            let mut expected = vec![0; len];
            let mut actual = vec![0; len];
            fill_durations_generic(&offsets, &mut expected);
            fill_durations_slices(&offsets, &mut actual, level);
            assert_eq!(expected, actual, "length {len}");
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_avx2_matches_scalar_for_all_lengths() {
        if !is_x86_feature_detected!("avx2") {
            return;
        }
        for len in 0..40usize {
            let offsets: Vec<i64> = (0..len as i64).map(|i| i * i * 3 + (i % 5) * 7).collect();
            let mut expected = vec![0; len];
            let mut actual = vec![-1; len];
            fill_durations_generic(&offsets, &mut expected);
            // SAFETY: AVX2 support checked above
            unsafe { fill_durations_avx2(&offsets, &mut actual) };
            assert_eq!(expected, actual, "length {len}");
        }
    }

    #[test]
    fn test_waveform_fill() {
        let mut w = SparseWaveform::<f32>::from_parts(1, vec![0, 10, 25, 40], vec![0; 4], vec![0.0; 4]);
        fill_durations(&mut w, SimdLevel::Scalar);
        assert_eq!(w.durations.as_slice(), &[10, 15, 15, 1]);
    }
}
