//! Built-in filters
//!
//! - **CaptureSource**: holds waveforms handed in by the host
//! - **ThresholdFilter**: analog to digital slicing
//! - **FrequencyMeasurement**: per-cycle frequency
//! - **ClockRecoveryFilter**: bang-bang PLL
//! - **FirFilter**: Kaiser-window FIR with SIMD and compute kernel backends

mod clock_recovery;
pub mod fir;
mod frequency;
mod source;
mod threshold;

pub use clock_recovery::{BangBangPll, ClockRecoveryFilter, LockStats};
pub use fir::{FirFilter, FirFilterType};
pub use frequency::FrequencyMeasurement;
pub use source::CaptureSource;
pub use threshold::ThresholdFilter;

use crate::runtime::registry::FilterRegistry;

/// Add every built-in filter to `registry`
pub(crate) fn register_builtin_filters(registry: &mut FilterRegistry) {
    registry.register("Clock Recovery (PLL)", || Box::new(ClockRecoveryFilter::new()));
    registry.register("FIR Filter", || Box::new(FirFilter::new()));
    registry.register("Frequency", || Box::new(FrequencyMeasurement::new()));
    registry.register("Threshold", || Box::new(ThresholdFilter::new()));
}
