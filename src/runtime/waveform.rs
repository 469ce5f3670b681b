//! Waveform sample model
//!
//! A waveform is a time series with one of two addressing schemes crossed with one
//! of two value domains:
//!
//! |             | analog (`f32`)          | digital (`bool`)         |
//! |-------------|-------------------------|--------------------------|
//! | **uniform** | [`UniformAnalogWaveform`] | [`UniformDigitalWaveform`] |
//! | **sparse**  | [`SparseAnalogWaveform`]  | [`SparseDigitalWaveform`]  |
//!
//! Uniform sample `i` occurs at `trigger_phase + i * timescale`. Sparse samples carry
//! an explicit offset and duration, both in ticks of `timescale`.
//!
//! All times are integer femtoseconds.

use super::buffer::AcceleratorBuffer;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Femtoseconds per second
pub const FS_PER_SECOND: i64 = 1_000_000_000_000_000;

/// Femtoseconds per second, as a float for rate arithmetic
pub const FS_PER_SECOND_F64: f64 = 1e15;

static NEXT_WAVEFORM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a waveform allocation
///
/// Assigned when a waveform is created and never reused. Cloning a waveform
/// produces a new identity, so two live waveforms never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaveformId(u64);

impl WaveformId {
    fn next() -> Self {
        Self(NEXT_WAVEFORM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Metadata shared by every waveform shape
#[derive(Debug)]
pub struct WaveformMeta {
    id: WaveformId,
    /// Femtoseconds per tick
    pub timescale: i64,
    /// Femtoseconds from the trigger to tick zero
    pub trigger_phase: i64,
    /// Wall clock time of the capture, in seconds since the unix epoch
    pub start_timestamp: i64,
    /// Sub-second part of the capture time
    pub start_femtoseconds: i64,
    /// Bumped every time the owning filter republishes this waveform
    pub revision: u64,
}

impl WaveformMeta {
    pub fn new(timescale: i64) -> Self {
        Self {
            id: WaveformId::next(),
            timescale,
            trigger_phase: 0,
            start_timestamp: 0,
            start_femtoseconds: 0,
            revision: 0,
        }
    }

    pub fn id(&self) -> WaveformId {
        self.id
    }

    /// Copy timebase and capture time from another waveform (revision is untouched)
    pub fn copy_timebase_from(&mut self, other: &WaveformMeta) {
        self.timescale = other.timescale;
        self.trigger_phase = other.trigger_phase;
        self.start_timestamp = other.start_timestamp;
        self.start_femtoseconds = other.start_femtoseconds;
    }
}

impl Clone for WaveformMeta {
    fn clone(&self) -> Self {
        Self {
            id: WaveformId::next(),
            timescale: self.timescale,
            trigger_phase: self.trigger_phase,
            start_timestamp: self.start_timestamp,
            start_femtoseconds: self.start_femtoseconds,
            revision: self.revision,
        }
    }
}

impl Default for WaveformMeta {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Tick addressing of a waveform, independent of its sample type
pub trait Timebase {
    fn meta(&self) -> &WaveformMeta;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start of sample `i`, in ticks
    fn offset(&self, i: usize) -> i64;

    /// Duration of sample `i`, in ticks
    fn duration(&self, i: usize) -> i64;

    /// Start of sample `i`, in femtoseconds from the trigger
    #[inline]
    fn offset_scaled(&self, i: usize) -> i64 {
        self.offset(i) * self.meta().timescale + self.meta().trigger_phase
    }

    /// Duration of sample `i`, in femtoseconds
    #[inline]
    fn duration_scaled(&self, i: usize) -> i64 {
        self.duration(i) * self.meta().timescale
    }
}

/// Typed sample access on top of a timebase
pub trait WaveformData<S>: Timebase {
    /// Host-side samples. The caller is responsible for CPU residency.
    fn samples(&self) -> &[S];
}

/// Uniformly sampled waveform
#[derive(Debug, Clone)]
pub struct UniformWaveform<S> {
    pub meta: WaveformMeta,
    pub samples: AcceleratorBuffer<S>,
}

impl<S: Copy + Default> UniformWaveform<S> {
    pub fn new(timescale: i64) -> Self {
        Self {
            meta: WaveformMeta::new(timescale),
            samples: AcceleratorBuffer::new(),
        }
    }

    pub fn from_samples(timescale: i64, samples: Vec<S>) -> Self {
        Self {
            meta: WaveformMeta::new(timescale),
            samples: AcceleratorBuffer::from_vec(samples),
        }
    }

    pub fn resize(&mut self, len: usize) {
        self.samples.resize(len);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn prepare_for_cpu_access(&mut self) {
        self.samples.prepare_for_cpu_access();
    }

    pub fn prepare_for_gpu_access(&mut self) {
        self.samples.prepare_for_gpu_access();
    }

    pub fn mark_modified_from_cpu(&mut self) {
        self.samples.mark_modified_from_cpu();
    }

    pub fn mark_modified_from_gpu(&mut self) {
        self.samples.mark_modified_from_gpu();
    }
}

impl<S: Copy + Default> Timebase for UniformWaveform<S> {
    fn meta(&self) -> &WaveformMeta {
        &self.meta
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    fn offset(&self, i: usize) -> i64 {
        i as i64
    }

    #[inline]
    fn duration(&self, _i: usize) -> i64 {
        1
    }
}

impl<S: Copy + Default> WaveformData<S> for UniformWaveform<S> {
    fn samples(&self) -> &[S] {
        self.samples.as_slice()
    }
}

/// Sparsely sampled waveform: explicit offset and duration per sample
#[derive(Debug, Clone)]
pub struct SparseWaveform<S> {
    pub meta: WaveformMeta,
    pub offsets: AcceleratorBuffer<i64>,
    pub durations: AcceleratorBuffer<i64>,
    pub samples: AcceleratorBuffer<S>,
}

impl<S: Copy + Default> SparseWaveform<S> {
    pub fn new(timescale: i64) -> Self {
        Self {
            meta: WaveformMeta::new(timescale),
            offsets: AcceleratorBuffer::new(),
            durations: AcceleratorBuffer::new(),
            samples: AcceleratorBuffer::new(),
        }
    }

    /// Build from parallel offset/duration/sample vectors
    pub fn from_parts(timescale: i64, offsets: Vec<i64>, durations: Vec<i64>, samples: Vec<S>) -> Self {
        debug_assert_eq!(offsets.len(), samples.len());
        debug_assert_eq!(durations.len(), samples.len());
        Self {
            meta: WaveformMeta::new(timescale),
            offsets: offsets.into(),
            durations: durations.into(),
            samples: samples.into(),
        }
    }

    /// Append one sample (host side)
    pub fn push(&mut self, offset: i64, duration: i64, value: S) {
        self.offsets.push(offset);
        self.durations.push(duration);
        self.samples.push(value);
    }

    pub fn resize(&mut self, len: usize) {
        self.offsets.resize(len);
        self.durations.resize(len);
        self.samples.resize(len);
    }

    pub fn reserve(&mut self, additional: usize) {
        self.offsets.reserve(additional);
        self.durations.reserve(additional);
        self.samples.reserve(additional);
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
        self.durations.clear();
        self.samples.clear();
    }

    pub fn prepare_for_cpu_access(&mut self) {
        self.offsets.prepare_for_cpu_access();
        self.durations.prepare_for_cpu_access();
        self.samples.prepare_for_cpu_access();
    }

    pub fn prepare_for_gpu_access(&mut self) {
        self.offsets.prepare_for_gpu_access();
        self.durations.prepare_for_gpu_access();
        self.samples.prepare_for_gpu_access();
    }

    pub fn mark_timestamps_modified_from_cpu(&mut self) {
        self.offsets.mark_modified_from_cpu();
        self.durations.mark_modified_from_cpu();
    }

    pub fn mark_modified_from_cpu(&mut self) {
        self.mark_timestamps_modified_from_cpu();
        self.samples.mark_modified_from_cpu();
    }

    pub fn mark_modified_from_gpu(&mut self) {
        self.offsets.mark_modified_from_gpu();
        self.durations.mark_modified_from_gpu();
        self.samples.mark_modified_from_gpu();
    }
}

impl<S: Copy + Default> Timebase for SparseWaveform<S> {
    fn meta(&self) -> &WaveformMeta {
        &self.meta
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    fn offset(&self, i: usize) -> i64 {
        self.offsets.as_slice()[i]
    }

    #[inline]
    fn duration(&self, i: usize) -> i64 {
        self.durations.as_slice()[i]
    }
}

impl<S: Copy + Default> WaveformData<S> for SparseWaveform<S> {
    fn samples(&self) -> &[S] {
        self.samples.as_slice()
    }
}

pub type UniformAnalogWaveform = UniformWaveform<f32>;
pub type SparseAnalogWaveform = SparseWaveform<f32>;
pub type UniformDigitalWaveform = UniformWaveform<bool>;
pub type SparseDigitalWaveform = SparseWaveform<bool>;

/// Concrete shape of a waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaveformShape {
    UniformAnalog,
    SparseAnalog,
    UniformDigital,
    SparseDigital,
}

impl WaveformShape {
    pub fn is_analog(&self) -> bool {
        matches!(self, Self::UniformAnalog | Self::SparseAnalog)
    }

    pub fn is_uniform(&self) -> bool {
        matches!(self, Self::UniformAnalog | Self::UniformDigital)
    }
}

/// Any of the four waveform shapes
#[derive(Debug, Clone)]
pub enum Waveform {
    UniformAnalog(UniformAnalogWaveform),
    SparseAnalog(SparseAnalogWaveform),
    UniformDigital(UniformDigitalWaveform),
    SparseDigital(SparseDigitalWaveform),
}

macro_rules! with_waveform {
    ($self:expr, $w:ident => $body:expr) => {
        match $self {
            Waveform::UniformAnalog($w) => $body,
            Waveform::SparseAnalog($w) => $body,
            Waveform::UniformDigital($w) => $body,
            Waveform::SparseDigital($w) => $body,
        }
    };
}

impl Waveform {
    pub fn shape(&self) -> WaveformShape {
        match self {
            Waveform::UniformAnalog(_) => WaveformShape::UniformAnalog,
            Waveform::SparseAnalog(_) => WaveformShape::SparseAnalog,
            Waveform::UniformDigital(_) => WaveformShape::UniformDigital,
            Waveform::SparseDigital(_) => WaveformShape::SparseDigital,
        }
    }

    pub fn meta(&self) -> &WaveformMeta {
        with_waveform!(self, w => &w.meta)
    }

    pub fn meta_mut(&mut self) -> &mut WaveformMeta {
        with_waveform!(self, w => &mut w.meta)
    }

    pub fn id(&self) -> WaveformId {
        self.meta().id()
    }

    pub fn revision(&self) -> u64 {
        self.meta().revision
    }

    pub fn timescale(&self) -> i64 {
        self.meta().timescale
    }

    pub fn trigger_phase(&self) -> i64 {
        self.meta().trigger_phase
    }

    pub fn len(&self) -> usize {
        with_waveform!(self, w => w.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offset(&self, i: usize) -> i64 {
        with_waveform!(self, w => w.offset(i))
    }

    pub fn offset_scaled(&self, i: usize) -> i64 {
        with_waveform!(self, w => w.offset_scaled(i))
    }

    pub fn duration_scaled(&self, i: usize) -> i64 {
        with_waveform!(self, w => w.duration_scaled(i))
    }

    pub fn clear(&mut self) {
        with_waveform!(self, w => w.clear())
    }

    pub fn prepare_for_cpu_access(&mut self) {
        with_waveform!(self, w => w.prepare_for_cpu_access())
    }

    pub fn prepare_for_gpu_access(&mut self) {
        with_waveform!(self, w => w.prepare_for_gpu_access())
    }

    pub fn mark_modified_from_cpu(&mut self) {
        with_waveform!(self, w => w.mark_modified_from_cpu())
    }

    pub fn mark_modified_from_gpu(&mut self) {
        with_waveform!(self, w => w.mark_modified_from_gpu())
    }

    pub fn as_uniform_analog(&self) -> Option<&UniformAnalogWaveform> {
        match self {
            Waveform::UniformAnalog(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_sparse_analog(&self) -> Option<&SparseAnalogWaveform> {
        match self {
            Waveform::SparseAnalog(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_uniform_digital(&self) -> Option<&UniformDigitalWaveform> {
        match self {
            Waveform::UniformDigital(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_sparse_digital(&self) -> Option<&SparseDigitalWaveform> {
        match self {
            Waveform::SparseDigital(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_uniform_analog_mut(&mut self) -> Option<&mut UniformAnalogWaveform> {
        match self {
            Waveform::UniformAnalog(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_sparse_analog_mut(&mut self) -> Option<&mut SparseAnalogWaveform> {
        match self {
            Waveform::SparseAnalog(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_uniform_digital_mut(&mut self) -> Option<&mut UniformDigitalWaveform> {
        match self {
            Waveform::UniformDigital(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_sparse_digital_mut(&mut self) -> Option<&mut SparseDigitalWaveform> {
        match self {
            Waveform::SparseDigital(w) => Some(w),
            _ => None,
        }
    }
}

impl From<UniformAnalogWaveform> for Waveform {
    fn from(w: UniformAnalogWaveform) -> Self {
        Waveform::UniformAnalog(w)
    }
}

impl From<SparseAnalogWaveform> for Waveform {
    fn from(w: SparseAnalogWaveform) -> Self {
        Waveform::SparseAnalog(w)
    }
}

impl From<UniformDigitalWaveform> for Waveform {
    fn from(w: UniformDigitalWaveform) -> Self {
        Waveform::UniformDigital(w)
    }
}

impl From<SparseDigitalWaveform> for Waveform {
    fn from(w: SparseDigitalWaveform) -> Self {
        Waveform::SparseDigital(w)
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?}[id={}, rev={}, len={}, timescale={}fs]",
            self.shape(),
            self.id().as_u64(),
            self.revision(),
            self.len(),
            self.timescale()
        )
    }
}

/// Typed access to one concrete shape inside a [`Waveform`]
///
/// Used by the output setup helpers to reuse a stream's waveform when its shape
/// matches and replace it otherwise.
pub trait WaveformVariant: Sized {
    const SHAPE: WaveformShape;

    fn empty() -> Self;

    fn into_waveform(self) -> Waveform;

    fn from_waveform_mut(w: &mut Waveform) -> Option<&mut Self>;

    fn meta_mut(&mut self) -> &mut WaveformMeta;

    fn clear(&mut self);
}

macro_rules! impl_waveform_variant {
    ($ty:ty, $variant:ident) => {
        impl WaveformVariant for $ty {
            const SHAPE: WaveformShape = WaveformShape::$variant;

            fn empty() -> Self {
                <$ty>::new(1)
            }

            fn into_waveform(self) -> Waveform {
                Waveform::$variant(self)
            }

            fn from_waveform_mut(w: &mut Waveform) -> Option<&mut Self> {
                match w {
                    Waveform::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn meta_mut(&mut self) -> &mut WaveformMeta {
                &mut self.meta
            }

            fn clear(&mut self) {
                <$ty>::clear(self)
            }
        }
    };
}

impl_waveform_variant!(UniformAnalogWaveform, UniformAnalog);
impl_waveform_variant!(SparseAnalogWaveform, SparseAnalog);
impl_waveform_variant!(UniformDigitalWaveform, UniformDigital);
impl_waveform_variant!(SparseDigitalWaveform, SparseDigital);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_offsets() {
        let mut w = UniformAnalogWaveform::from_samples(1000, vec![0.0; 4]);
        w.meta.trigger_phase = 250;
        assert_eq!(w.offset(3), 3);
        assert_eq!(w.offset_scaled(3), 3250);
        assert_eq!(w.duration_scaled(0), 1000);
    }

    #[test]
    fn test_sparse_offsets() {
        let w = SparseDigitalWaveform::from_parts(10, vec![0, 5, 7], vec![5, 2, 1], vec![false, true, false]);
        assert_eq!(w.offset_scaled(1), 50);
        assert_eq!(w.duration_scaled(1), 20);
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn test_clone_gets_new_identity() {
        let a: Waveform = UniformAnalogWaveform::from_samples(1, vec![1.0]).into();
        let b = a.clone();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.revision(), b.revision());
    }

    #[test]
    fn test_shape_views() {
        let w: Waveform = SparseAnalogWaveform::new(1).into();
        assert_eq!(w.shape(), WaveformShape::SparseAnalog);
        assert!(w.as_sparse_analog().is_some());
        assert!(w.as_uniform_analog().is_none());
        assert!(w.shape().is_analog());
        assert!(!w.shape().is_uniform());
    }
}
