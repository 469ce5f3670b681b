//! Runtime vector instruction set selection

use std::fmt;

/// Widest vector extension a kernel may use
///
/// Ordered so that `a <= b` means "a needs no more than b provides".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SimdLevel {
    Scalar,
    Avx2,
    Avx512,
}

impl fmt::Display for SimdLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SimdLevel::Scalar => "scalar",
            SimdLevel::Avx2 => "avx2",
            SimdLevel::Avx512 => "avx512f",
        };
        write!(f, "{s}")
    }
}

lazy_static::lazy_static! {
    static ref DETECTED: SimdLevel = probe();
}

#[cfg(target_arch = "x86_64")]
fn probe() -> SimdLevel {
    if is_x86_feature_detected!("avx512f") {
        SimdLevel::Avx512
    } else if is_x86_feature_detected!("avx2") {
        SimdLevel::Avx2
    } else {
        SimdLevel::Scalar
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn probe() -> SimdLevel {
    SimdLevel::Scalar
}

/// Best level supported by the running CPU (probed once per process)
pub fn detect_simd_level() -> SimdLevel {
    *DETECTED
}

/// Level to actually run at: the requested override, capped by what the CPU supports
pub fn effective_simd_level(requested: Option<SimdLevel>) -> SimdLevel {
    let detected = detect_simd_level();
    requested.map_or(detected, |r| r.min(detected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_never_exceeds_hardware() {
        let detected = detect_simd_level();
        assert_eq!(effective_simd_level(None), detected);
        assert_eq!(effective_simd_level(Some(SimdLevel::Scalar)), SimdLevel::Scalar);
        assert!(effective_simd_level(Some(SimdLevel::Avx512)) <= detected);
    }
}
