//! Dual-resident sample storage
//!
//! [`AcceleratorBuffer`] keeps one copy of its contents in host memory and one in
//! device memory, with explicit residency negotiation:
//!
//! - `prepare_for_cpu_access()` / `prepare_for_gpu_access()` make the requested
//!   side current, copying from the other side only if it is stale.
//! - `mark_modified_from_cpu()` / `mark_modified_from_gpu()` flag the other side
//!   stale after a write.
//!
//! Every read must be bracketed by the matching prepare call and every write
//! followed by the matching mark call. Nothing here enforces that; a missed mark
//! shows up as stale data on the other side, which is exactly what real device
//! memory would do.
//!
//! The device side is plain host memory. Backends that own real device memory
//! sit behind [`crate::runtime::dispatch::ComputeQueue`] and only see the
//! device slice.

use std::fmt;
use tracing::trace;

/// Hint about how likely future access from one side is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageHint {
    Never,
    Unlikely,
    Likely,
}

/// Where a filter wants its input sample data when it is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLocation {
    /// Inputs must be readable from the CPU
    Cpu,
    /// Inputs must be readable from the GPU
    Gpu,
    /// The filter manages residency itself
    DontCare,
}

/// Sample array resident on CPU and/or GPU
#[derive(Clone)]
pub struct AcceleratorBuffer<T> {
    cpu: Vec<T>,
    gpu: Vec<T>,
    cpu_valid: bool,
    gpu_valid: bool,
    cpu_hint: UsageHint,
    gpu_hint: UsageHint,
}

impl<T: Copy + Default> AcceleratorBuffer<T> {
    /// Create an empty buffer (CPU-resident)
    pub fn new() -> Self {
        Self {
            cpu: Vec::new(),
            gpu: Vec::new(),
            cpu_valid: true,
            gpu_valid: false,
            cpu_hint: UsageHint::Likely,
            gpu_hint: UsageHint::Unlikely,
        }
    }

    /// Wrap existing host data
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            cpu: data,
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        if self.cpu_valid {
            self.cpu.len()
        } else {
            self.gpu.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_cpu_access_hint(&mut self, hint: UsageHint) {
        self.cpu_hint = hint;
    }

    pub fn set_gpu_access_hint(&mut self, hint: UsageHint) {
        self.gpu_hint = hint;
    }

    pub fn cpu_access_hint(&self) -> UsageHint {
        self.cpu_hint
    }

    pub fn gpu_access_hint(&self) -> UsageHint {
        self.gpu_hint
    }

    /// True if the host copy is current
    pub fn is_cpu_resident(&self) -> bool {
        self.cpu_valid
    }

    /// True if the device copy is current
    pub fn is_gpu_resident(&self) -> bool {
        self.gpu_valid
    }

    /// Make the host copy current, transferring from the device if needed
    pub fn prepare_for_cpu_access(&mut self) {
        if self.cpu_valid {
            return;
        }
        trace!("device -> host transfer ({} elements)", self.gpu.len());
        self.cpu.clear();
        self.cpu.extend_from_slice(&self.gpu);
        self.cpu_valid = true;
    }

    /// Make the device copy current, transferring from the host if needed
    pub fn prepare_for_gpu_access(&mut self) {
        if self.gpu_valid {
            return;
        }
        trace!("host -> device transfer ({} elements)", self.cpu.len());
        self.gpu.clear();
        self.gpu.extend_from_slice(&self.cpu);
        self.gpu_valid = true;
    }

    /// The host copy was written; the device copy is now stale
    pub fn mark_modified_from_cpu(&mut self) {
        self.cpu_valid = true;
        self.gpu_valid = false;
    }

    /// The device copy was written; the host copy is now stale
    pub fn mark_modified_from_gpu(&mut self) {
        self.gpu_valid = true;
        self.cpu_valid = false;
    }

    /// Host-side view. Call `prepare_for_cpu_access()` first.
    pub fn as_slice(&self) -> &[T] {
        &self.cpu
    }

    /// Host-side mutable view. Call `mark_modified_from_cpu()` after writing.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.cpu
    }

    /// Device-side view. Call `prepare_for_gpu_access()` first.
    pub fn device_slice(&self) -> &[T] {
        &self.gpu
    }

    /// Device-side mutable view. Call `mark_modified_from_gpu()` after writing.
    pub fn device_slice_mut(&mut self) -> &mut [T] {
        &mut self.gpu
    }

    /// Resize the host copy; the device copy becomes stale.
    pub fn resize(&mut self, len: usize) {
        self.prepare_for_cpu_access();
        self.cpu.resize(len, T::default());
        self.gpu_valid = false;
    }

    pub fn reserve(&mut self, additional: usize) {
        self.cpu.reserve(additional);
    }

    /// Append on the host side. Call `mark_modified_from_cpu()` when done.
    pub fn push(&mut self, value: T) {
        self.cpu.push(value);
    }

    pub fn clear(&mut self) {
        self.cpu.clear();
        self.gpu.clear();
        self.cpu_valid = true;
        self.gpu_valid = false;
    }

    /// Copy `src` into the host side starting at `at`
    pub fn copy_from_slice_at(&mut self, at: usize, src: &[T]) {
        self.cpu[at..at + src.len()].copy_from_slice(src);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.cpu.iter()
    }
}

impl<T: Copy + Default> Default for AcceleratorBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default> From<Vec<T>> for AcceleratorBuffer<T> {
    fn from(data: Vec<T>) -> Self {
        Self::from_vec(data)
    }
}

impl<T> fmt::Debug for AcceleratorBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "AcceleratorBuffer[cpu={}{}, gpu={}{}]",
            self.cpu.len(),
            if self.cpu_valid { "" } else { " (stale)" },
            self.gpu.len(),
            if self.gpu_valid { "" } else { " (stale)" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_round_trip() {
        let mut buf = AcceleratorBuffer::from_vec(vec![1.0f32, 2.0, 3.0]);
        buf.prepare_for_gpu_access();
        assert!(buf.is_gpu_resident());
        assert_eq!(buf.device_slice(), &[1.0, 2.0, 3.0]);

        buf.device_slice_mut()[1] = 5.0;
        buf.mark_modified_from_gpu();
        assert!(!buf.is_cpu_resident());

        buf.prepare_for_cpu_access();
        assert_eq!(buf.as_slice(), &[1.0, 5.0, 3.0]);
    }

    #[test]
    fn test_unmarked_write_is_not_visible() {
        let mut buf = AcceleratorBuffer::from_vec(vec![0i64; 4]);
        buf.prepare_for_gpu_access();
        buf.device_slice_mut()[0] = 9;

        // No mark_modified_from_gpu(): the host copy is still considered current
        buf.prepare_for_cpu_access();
        assert_eq!(buf.as_slice()[0], 0);
    }

    #[test]
    fn test_resize_invalidates_device_copy() {
        let mut buf = AcceleratorBuffer::from_vec(vec![1.0f32; 2]);
        buf.prepare_for_gpu_access();
        buf.resize(8);
        assert_eq!(buf.len(), 8);
        assert!(!buf.is_gpu_resident());
    }
}
