//! Memoization of zero-crossing searches
//!
//! Many filters look for the same crossings in the same input waveform during one
//! evaluation pass. Results are stored per `(waveform id, revision, threshold)`,
//! so a republished waveform (new revision) or a different allocation (new id)
//! never hits a stale entry.
//!
//! Mutating a waveform in place without bumping its revision still returns stale
//! results; [`AnalysisCache::clear`] is the explicit hook for that case.

use crate::runtime::waveform::{Waveform, WaveformId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Cache key for one crossing search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub waveform: WaveformId,
    pub revision: u64,
    /// `f32::to_bits` of the threshold; 0 for digital waveforms
    pub threshold_bits: u32,
}

impl CacheKey {
    pub fn new(waveform: &Waveform, threshold: f32) -> Self {
        // +0.0 and -0.0 must share an entry
        let threshold_bits = if threshold == 0.0 { 0 } else { threshold.to_bits() };
        Self {
            waveform: waveform.id(),
            revision: waveform.revision(),
            threshold_bits,
        }
    }
}

/// Counters describing cache effectiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Zero-crossing cache shared by every node of a graph
#[derive(Debug, Default)]
pub struct AnalysisCache {
    entries: Mutex<HashMap<CacheKey, Arc<[i64]>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stored result for `key`, computing and storing it on a miss
    ///
    /// `compute` runs without the lock held.
    pub fn get_or_compute(&self, key: CacheKey, compute: impl FnOnce() -> Vec<i64>) -> Arc<[i64]> {
        if let Some(hit) = self.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value: Arc<[i64]> = compute().into();
        trace!(
            "analysis cache miss: waveform {} rev {} ({} crossings)",
            key.waveform.as_u64(),
            key.revision,
            value.len()
        );
        self.lock().entry(key).or_insert(value).clone()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Arc<[i64]>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
