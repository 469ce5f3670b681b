//! Kaiser-window FIR design
//!
//! Band edges are fractions of the Nyquist frequency. Designs are always
//! symmetric with an odd number of taps.

use crate::runtime::errors::{FilterError, FilterResult};
use std::f64::consts::PI;
use std::fmt;

/// Longest filter we are willing to run
pub const MAX_FILTER_LENGTH: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirFilterType {
    LowPass,
    HighPass,
    BandPass,
    Notch,
}

impl FirFilterType {
    /// Parameter choices, in enum order
    pub const NAMES: [&'static str; 4] = ["Low pass", "High pass", "Band pass", "Notch"];

    pub fn from_index(i: usize) -> Option<Self> {
        match i {
            0 => Some(Self::LowPass),
            1 => Some(Self::HighPass),
            2 => Some(Self::BandPass),
            3 => Some(Self::Notch),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for FirFilterType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", Self::NAMES[self.index()])
    }
}

/// User-facing description of a filter, in Hz
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirSpec {
    pub filter_type: FirFilterType,
    /// Tap count, 0 to derive it from the attenuation and transition width
    pub length: usize,
    /// Stopband attenuation in dB
    pub stopband_atten: f32,
    pub freq_low: f64,
    pub freq_high: f64,
}

impl Default for FirSpec {
    fn default() -> Self {
        Self {
            filter_type: FirFilterType::LowPass,
            length: 0,
            stopband_atten: 60.0,
            freq_low: 0.0,
            freq_high: 100e6,
        }
    }
}

/// A realized filter for one sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct FirDesign {
    /// Passband edges actually used, in Hz
    pub freq_low: f64,
    pub freq_high: f64,
    pub coefficients: Vec<f32>,
}

impl FirDesign {
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Group delay in samples
    pub fn radius(&self) -> usize {
        self.coefficients.len().saturating_sub(1) / 2
    }
}

/// Clamp the band edges of `spec` to what a `sample_hz` input can represent
pub fn band_edges(spec: &FirSpec, sample_hz: f64) -> (f64, f64) {
    let nyquist = sample_hz / 2.0;
    let (mut flo, mut fhi) = (spec.freq_low, spec.freq_high);
    match spec.filter_type {
        FirFilterType::LowPass => flo = 0.0,
        FirFilterType::HighPass => fhi = nyquist,
        FirFilterType::BandPass | FirFilterType::Notch => {
            if fhi < flo {
                std::mem::swap(&mut flo, &mut fhi);
            }
        }
    }
    (flo.max(0.0), fhi.min(nyquist))
}

/// Design the filter described by `spec` for an input sampled at `sample_hz`
pub fn design_filter(spec: &FirSpec, sample_hz: f64) -> FilterResult<FirDesign> {
    if sample_hz.is_nan() || sample_hz <= 0.0 {
        return Err(FilterError::InvalidConfig(format!("sample rate {sample_hz} Hz")));
    }
    let nyquist = sample_hz / 2.0;
    let (flo, fhi) = band_edges(spec, sample_hz);
    if flo >= fhi {
        return Err(FilterError::InvalidConfig(format!(
            "empty passband {flo} Hz .. {fhi} Hz"
        )));
    }

    let len = (if spec.length == 0 {
        (spec.stopband_atten as f64 / 22.0 * (sample_hz / (fhi - flo))) as usize
    } else {
        spec.length
    }) | 1;
    if len > MAX_FILTER_LENGTH {
        return Err(FilterError::InvalidConfig(format!(
            "{len} taps, at most {MAX_FILTER_LENGTH} supported"
        )));
    }

    Ok(FirDesign {
        freq_low: flo,
        freq_high: fhi,
        coefficients: calculate_filter_coefficients(
            flo / nyquist,
            fhi / nyquist,
            spec.stopband_atten,
            spec.filter_type,
            len,
        ),
    })
}

/// Windowed-sinc coefficients for a passband of `fa..fb` (fractions of Nyquist)
///
/// `len` should be odd; an even length loses its last tap to symmetry.
pub fn calculate_filter_coefficients(
    fa: f64,
    fb: f64,
    stopband_atten: f32,
    filter_type: FirFilterType,
    len: usize,
) -> Vec<f32> {
    if len == 0 {
        return Vec::new();
    }
    let np = (len - 1) / 2;

    let impulse: Vec<f64> = (0..=np)
        .map(|j| {
            if j == 0 {
                fb - fa
            } else {
                let jp = j as f64 * PI;
                ((jp * fb).sin() - (jp * fa).sin()) / jp
            }
        })
        .collect();

    let alpha = kaiser_alpha(stopband_atten);
    let ia = bessel_i0(alpha);
    let sign = if filter_type == FirFilterType::Notch { -1.0 } else { 1.0 };

    let mut coeffs = vec![0f32; len];
    for (j, h) in impulse.iter().enumerate() {
        let window = if np == 0 {
            1.0
        } else {
            let r = j as f64 / np as f64;
            bessel_i0(alpha * (1.0 - r * r).sqrt()) / ia
        };
        coeffs[np + j] = (sign * h * window) as f32;
    }
    if filter_type == FirFilterType::Notch {
        coeffs[np] += 1.0;
    }
    for j in 0..np {
        coeffs[j] = coeffs[len - 1 - j];
    }
    coeffs
}

/// Kaiser window shape factor for a stopband attenuation in dB
pub fn kaiser_alpha(stopband_atten: f32) -> f64 {
    let a = stopband_atten as f64;
    if a < 21.0 {
        0.0
    } else if a > 50.0 {
        0.1102 * (a - 8.7)
    } else {
        0.5842 * (a - 21.0).powf(0.4) + 0.07886 * (a - 21.0)
    }
}

/// Zeroth-order modified Bessel function of the first kind (power series)
pub fn bessel_i0(x: f64) -> f64 {
    let mut d = 0.0;
    let mut ds = 1.0;
    let mut s = 1.0;
    while ds > s * 1e-6 {
        d += 2.0;
        ds *= (x * x) / (d * d);
        s += ds;
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lowpass(freq_high: f64) -> FirSpec {
        FirSpec {
            freq_high,
            ..FirSpec::default()
        }
    }

    fn magnitude(coeffs: &[f32], f: f64, sample_hz: f64) -> f64 {
        let w = 2.0 * PI * f / sample_hz;
        let (re, im) = coeffs.iter().enumerate().fold((0.0, 0.0), |(re, im), (k, &c)| {
            let c = c as f64;
            (re + c * (w * k as f64).cos(), im + c * (w * k as f64).sin())
        });
        (re * re + im * im).sqrt()
    }

    #[test]
    fn test_lowpass_is_symmetric_and_odd() {
        let d = design_filter(&lowpass(100e6), 1e9).unwrap();
        assert_eq!(d.len(), 27);
        assert_eq!(d.len() % 2, 1);
        assert_eq!(d.radius(), 13);

        let c = &d.coefficients;
        for j in 0..c.len() {
            assert_eq!(c[j], c[c.len() - 1 - j]);
        }

        let dc: f32 = c.iter().sum();
        assert!((dc - 1.0).abs() < 0.01, "{dc}");
        assert!(magnitude(c, 400e6, 1e9) < 1e-3);
    }

    #[test]
    fn test_explicit_length_forced_odd() {
        let spec = FirSpec {
            length: 64,
            ..lowpass(50e6)
        };
        assert_eq!(design_filter(&spec, 1e9).unwrap().len(), 65);
    }

    #[test]
    fn test_notch_is_complement_of_bandpass() {
        let bp = FirSpec {
            filter_type: FirFilterType::BandPass,
            length: 31,
            freq_low: 100e6,
            freq_high: 200e6,
            ..FirSpec::default()
        };
        let notch = FirSpec {
            filter_type: FirFilterType::Notch,
            // Reversed edges are swapped
            freq_low: 200e6,
            freq_high: 100e6,
            ..bp
        };
        let a = design_filter(&bp, 1e9).unwrap().coefficients;
        let b = design_filter(&notch, 1e9).unwrap().coefficients;
        for (j, (x, y)) in a.iter().zip(&b).enumerate() {
            let expected = if j == 15 { 1.0 } else { 0.0 };
            assert!((x + y - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_band_edges_clamped() {
        let hp = FirSpec {
            filter_type: FirFilterType::HighPass,
            freq_low: -5.0,
            freq_high: 1.0,
            ..FirSpec::default()
        };
        assert_eq!(band_edges(&hp, 1e9), (0.0, 500e6));
        assert_eq!(band_edges(&lowpass(2e9), 1e9), (0.0, 500e6));
    }

    #[test]
    fn test_rejects_zero_width_band() {
        let spec = FirSpec {
            filter_type: FirFilterType::BandPass,
            freq_low: 100e6,
            freq_high: 100e6,
            ..FirSpec::default()
        };
        assert!(matches!(design_filter(&spec, 1e9), Err(FilterError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_overlong_filter() {
        // 60/22 * 1e9/10e3 taps
        assert!(design_filter(&lowpass(10e3), 1e9).is_err());

        let spec = FirSpec {
            length: 5000,
            ..lowpass(100e6)
        };
        assert!(design_filter(&spec, 1e9).is_err());
    }

    #[test]
    fn test_kaiser_alpha_regions() {
        assert_eq!(kaiser_alpha(20.0), 0.0);
        assert!((kaiser_alpha(60.0) - 0.1102 * 51.3).abs() < 1e-9);
        let mid = kaiser_alpha(40.0);
        assert!(mid > 0.0 && mid < kaiser_alpha(60.0));
    }

    #[test]
    fn test_bessel_i0() {
        assert_eq!(bessel_i0(0.0), 1.0);
        // I0(1) = 1.2660658...
        assert!((bessel_i0(1.0) - 1.266_065_8).abs() < 1e-5);
    }
}
