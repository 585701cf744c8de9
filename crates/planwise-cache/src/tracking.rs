//! Lightweight counters and peak tracking for the cache manager.
//!
//! Keep this cheap: plain atomics, read as a `CacheStats` snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Default)]
pub struct PeakTracker {
    peak_bytes: AtomicU64,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self {
            peak_bytes: AtomicU64::new(0),
        }
    }

    /// Record a new "used bytes" value; updates peak if higher.
    pub fn record_used(&self, used_bytes: u64) {
        let mut cur = self.peak_bytes.load(Ordering::Relaxed);
        while used_bytes > cur {
            match self.peak_bytes.compare_exchange(
                cur,
                used_bytes,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
        tracing::trace!(
            used_bytes,
            peak = self.peak_bytes.load(Ordering::Relaxed),
            "cache usage"
        );
    }

    pub fn peak(&self) -> u64 {
        self.peak_bytes.load(Ordering::Relaxed)
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub admissions: u64,
    pub rejections: u64,
    pub evictions: u64,
    pub entries: usize,
    pub used_bytes: u64,
    pub peak_bytes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub admissions: AtomicU64,
    pub rejections: AtomicU64,
    pub evictions: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_only_grows() {
        let t = PeakTracker::new();
        t.record_used(10);
        t.record_used(40);
        t.record_used(5);
        assert_eq!(t.peak(), 40);
    }

    #[test]
    fn hit_rate_handles_empty() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let s = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((s.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
