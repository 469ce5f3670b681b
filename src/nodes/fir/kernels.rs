//! FIR convolution kernels
//!
//! All kernels compute the valid part of the convolution:
//! `out[i] = sum(din[i + j] * coeffs[j])` for `i < din.len() - coeffs.len()`.
//! Coefficients are not assumed symmetric.

use crate::analysis::simd::SimdLevel;
use crate::runtime::dispatch::ComputeKernel;

/// Workgroup size of [`FirKernel`]
pub const FIR_BLOCK_SIZE: usize = 64;

/// Number of output samples for an input of `len` samples
pub fn output_len(len: usize, filterlen: usize) -> usize {
    len.saturating_sub(filterlen)
}

#[inline]
fn tap_sum(window: &[f32], coeffs: &[f32]) -> f32 {
    let mut v = 0.0;
    for (x, c) in window.iter().zip(coeffs) {
        v += x * c;
    }
    v
}

/// Scalar reference kernel
pub fn filter_generic(din: &[f32], coeffs: &[f32], out: &mut [f32]) {
    let end = output_len(din.len(), coeffs.len()).min(out.len());
    for (i, o) in out[..end].iter_mut().enumerate() {
        *o = tap_sum(&din[i..i + coeffs.len()], coeffs);
    }
}

/// AVX2 kernel: 32 outputs per iteration in four 8-lane accumulators
///
/// Accumulates in the same order as the scalar kernel without FMA, so results
/// are bit-identical to [`filter_generic`].
///
/// # Safety
/// The CPU must support AVX2.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
pub unsafe fn filter_avx2(din: &[f32], coeffs: &[f32], out: &mut [f32]) {
    use std::arch::x86_64::*;

    let filterlen = coeffs.len();
    let end = output_len(din.len(), filterlen).min(out.len());
    let end_rounded = end - (end % 32);
    let pin = din.as_ptr();
    let pout = out.as_mut_ptr();

    let mut i = 0;
    while i < end_rounded {
        // Loads reach din[i + 31 + filterlen - 1] < end + filterlen <= din.len()
        unsafe {
            let base = pin.add(i);
            let mut v = [_mm256_setzero_ps(); 4];
            for (j, &c) in coeffs.iter().enumerate() {
                let coeff = _mm256_set1_ps(c);
                for (k, acc) in v.iter_mut().enumerate() {
                    let x = _mm256_loadu_ps(base.add(j + 8 * k));
                    *acc = _mm256_add_ps(*acc, _mm256_mul_ps(coeff, x));
                }
            }
            for (k, acc) in v.iter().enumerate() {
                _mm256_storeu_ps(pout.add(i + 8 * k), *acc);
            }
        }
        i += 32;
    }

    // Stragglers
    for i in end_rounded..end {
        out[i] = tap_sum(&din[i..i + filterlen], coeffs);
    }
}

/// AVX-512F kernel: 64 outputs per iteration in four 16-lane FMA accumulators
///
/// # Safety
/// The CPU must support AVX-512F.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
pub unsafe fn filter_avx512(din: &[f32], coeffs: &[f32], out: &mut [f32]) {
    use std::arch::x86_64::*;

    let filterlen = coeffs.len();
    let end = output_len(din.len(), filterlen).min(out.len());
    let end_rounded = end - (end % 64);
    let pin = din.as_ptr();
    let pout = out.as_mut_ptr();

    let mut i = 0;
    while i < end_rounded {
        unsafe {
            let base = pin.add(i);
            let mut v = [_mm512_setzero_ps(); 4];
            for (j, &c) in coeffs.iter().enumerate() {
                let coeff = _mm512_set1_ps(c);
                for (k, acc) in v.iter_mut().enumerate() {
                    let x = _mm512_loadu_ps(base.add(j + 16 * k));
                    *acc = _mm512_fmadd_ps(coeff, x, *acc);
                }
            }
            for (k, acc) in v.iter().enumerate() {
                _mm512_storeu_ps(pout.add(i + 16 * k), *acc);
            }
        }
        i += 64;
    }

    for i in end_rounded..end {
        out[i] = tap_sum(&din[i..i + filterlen], coeffs);
    }
}

/// Run the widest kernel allowed by `level` and supported by the CPU
pub fn filter_cpu(din: &[f32], coeffs: &[f32], out: &mut [f32], level: SimdLevel) {
    #[cfg(target_arch = "x86_64")]
    {
        if level >= SimdLevel::Avx512 && is_x86_feature_detected!("avx512f") {
            // SAFETY: AVX-512F support checked above
            unsafe { filter_avx512(din, coeffs, out) };
            return;
        }
        if level >= SimdLevel::Avx2 && is_x86_feature_detected!("avx2") {
            // SAFETY: AVX2 support checked above
            unsafe { filter_avx2(din, coeffs, out) };
            return;
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    let _ = level;

    filter_generic(din, coeffs, out);
}

/// Compute kernel form of the filter
///
/// Bindings: 0 = input samples, 1 = coefficients, 2 = output.
/// Push constants: `[end, filterlen]`.
pub struct FirKernel;

impl ComputeKernel for FirKernel {
    fn name(&self) -> &str {
        "FIRFilter"
    }

    fn binding_count(&self) -> usize {
        3
    }

    fn output_slot(&self) -> usize {
        2
    }

    fn block_size(&self) -> usize {
        FIR_BLOCK_SIZE
    }

    fn invoke(&self, gid: usize, args: &[u32], inputs: &[&[f32]]) -> Option<f32> {
        let (&end, &filterlen) = (args.first()?, args.get(1)?);
        if gid >= end as usize {
            return None;
        }
        let din = inputs.first()?;
        let coeffs = inputs.get(1)?.get(..filterlen as usize)?;
        Some(tap_sum(din.get(gid..gid + coeffs.len())?, coeffs))
    }
}
